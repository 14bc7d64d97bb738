use actix_web::body::EitherBody;
use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::{Error, HttpResponse};
use futures_util::future::{LocalBoxFuture, ready, Ready};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use std::net::IpAddr;
use std::rc::Rc;
use std::sync::Arc;
use tracing::debug;

/// Compare two secrets in constant time. Both sides are hashed first so the
/// length does not leak either.
pub fn tokens_match(presented: &str, expected: &str) -> bool {
    let a = Sha256::digest(presented.as_bytes());
    let b = Sha256::digest(expected.as_bytes());
    a.as_slice().ct_eq(b.as_slice()).into()
}

/// Admits only loopback peers and the explicitly listed IP literals. The
/// transport address is used; forwarding headers are ignored here.
#[derive(Clone, Default)]
pub struct InternalAccess {
    allow: Arc<Vec<IpAddr>>,
}

impl InternalAccess {
    pub fn new(allow: Vec<IpAddr>) -> Self {
        Self { allow: Arc::new(allow) }
    }

    pub fn permits(&self, ip: IpAddr) -> bool {
        let ip = match ip {
            IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(IpAddr::V6(v6)),
            v4 => v4,
        };
        ip.is_loopback() || self.allow.contains(&ip)
    }
}

impl<S, B> Transform<S, ServiceRequest> for InternalAccess
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = InternalAccessMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(InternalAccessMiddleware {
            service: Rc::new(service),
            cfg: self.clone(),
        }))
    }
}

pub struct InternalAccessMiddleware<S> {
    service: Rc<S>,
    cfg: InternalAccess,
}

impl<S, B> Service<ServiceRequest> for InternalAccessMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &self,
        ctx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.service.poll_ready(ctx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let allowed = req.peer_addr().map(|a| self.cfg.permits(a.ip())).unwrap_or(false);
        if !allowed {
            debug!(peer = ?req.peer_addr(), "internal health probe refused");
            let res = req.into_response(HttpResponse::Forbidden().finish());
            return Box::pin(async move { Ok(res.map_into_right_body()) });
        }
        let svc = self.service.clone();
        Box::pin(async move {
            let res = svc.call(req).await?;
            Ok(res.map_into_left_body())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_comparison() {
        assert!(tokens_match("abc", "abc"));
        assert!(!tokens_match("abc", "abd"));
        assert!(!tokens_match("abc", "abcd"));
        assert!(!tokens_match("", "abc"));
    }

    #[test]
    fn loopback_and_listed_only() {
        let acl = InternalAccess::new(vec!["10.1.2.3".parse().unwrap()]);
        assert!(acl.permits("127.0.0.1".parse().unwrap()));
        assert!(acl.permits("::1".parse().unwrap()));
        assert!(acl.permits("::ffff:127.0.0.1".parse().unwrap()));
        assert!(acl.permits("10.1.2.3".parse().unwrap()));
        assert!(!acl.permits("10.1.2.4".parse().unwrap()));
        assert!(!InternalAccess::default().permits("192.0.2.10".parse().unwrap()));
    }
}
