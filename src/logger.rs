use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error,
};
use futures::future::LocalBoxFuture;
use log::info;
use std::rc::Rc;
use std::time::Instant;

/// 커스텀 Logger 미들웨어
/// HTTP 요청과 응답의 메서드, 경로, 상태 코드, 처리 시간을 로깅합니다.
/// 쿼리 값에는 토큰이 실릴 수 있으므로 파라미터 이름만 남깁니다.
pub struct LoggerMiddleware;

impl<S, B> Transform<S, ServiceRequest> for LoggerMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = LoggerMiddlewareService<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(LoggerMiddlewareService {
            service: Rc::new(service),
        }))
    }
}

pub struct LoggerMiddlewareService<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for LoggerMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let start_time = Instant::now();
        let method = req.method().to_string();
        let path = req.path().to_string();
        let query = redact_query(req.query_string());

        // 요청 정보 로깅
        info!("Request started: {} {}", method, path);
        if !query.is_empty() {
            info!("Query parameters: {}", query);
        }

        let service = self.service.clone();

        Box::pin(async move {
            let res = service.call(req).await?;

            // 응답 정보 로깅
            info!(
                "Request completed: {} {} - Status: {} ({}ms)",
                method,
                path,
                res.status().as_u16(),
                start_time.elapsed().as_millis()
            );

            Ok(res)
        })
    }
}

/// `a=1&token=xyz` 는 `a=<redacted>&token=<redacted>` 로 기록됩니다.
fn redact_query(query: &str) -> String {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let key = pair.split('=').next().unwrap_or_default();
            format!("{}=<redacted>", key)
        })
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_values_redacted() {
        assert_eq!(
            redact_query("user_id=42&token=eyJhbGciOi"),
            "user_id=<redacted>&token=<redacted>"
        );
    }

    #[test]
    fn test_empty_query() {
        assert_eq!(redact_query(""), "");
        assert_eq!(redact_query("&&"), "");
    }

    #[test]
    fn test_key_without_value() {
        assert_eq!(redact_query("flag"), "flag=<redacted>");
    }
}
