pub mod cookies;
pub mod headers;
pub mod request;
pub mod response;

#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Connect,
    Options,
    Trace,
    Unknown,
}

impl HttpMethod {
    /// Whether a request body is expected on stdin for this method.
    pub fn has_body(&self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put)
    }
}

pub fn http_method_from_str(method: &str) -> HttpMethod {
    match method.to_uppercase().as_str() {
        "GET" => HttpMethod::Get,
        "HEAD" => HttpMethod::Head,
        "POST" => HttpMethod::Post,
        "PUT" => HttpMethod::Put,
        "DELETE" => HttpMethod::Delete,
        "TRACE" => HttpMethod::Trace,
        "OPTIONS" => HttpMethod::Options,
        "CONNECT" => HttpMethod::Connect,
        _ => HttpMethod::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_parsing_is_case_insensitive() {
        assert_eq!(http_method_from_str("get"), HttpMethod::Get);
        assert_eq!(http_method_from_str("POST"), HttpMethod::Post);
        assert_eq!(http_method_from_str("brew"), HttpMethod::Unknown);
    }

    #[test]
    fn body_bearing_methods() {
        assert!(HttpMethod::Post.has_body());
        assert!(HttpMethod::Put.has_body());
        assert!(!HttpMethod::Get.has_body());
        assert!(!HttpMethod::Head.has_body());
    }
}
