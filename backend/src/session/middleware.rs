use actix_web::cookie::{Cookie, SameSite};
use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready};
use actix_web::{Error, FromRequest, HttpMessage, HttpRequest};
use futures::future::{Ready, ok};
use std::future::Future;
use std::pin::Pin;
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "xray_session";

/// Identity of one browser, carried in the `xray_session` cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub Uuid);

/// Makes sure every request has a [`SessionId`] and issues the cookie to
/// browsers that arrive without a valid one.
#[derive(Clone, Default)]
pub struct SessionMiddleware;

impl<S, B> Transform<S, ServiceRequest> for SessionMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = SessionMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(SessionMiddlewareService { service })
    }
}

pub struct SessionMiddlewareService<S> {
    service: S,
}

fn session_from_cookie(req: &ServiceRequest) -> Option<Uuid> {
    let cookie = req.cookie(SESSION_COOKIE)?;
    match Uuid::parse_str(cookie.value()) {
        Ok(id) => Some(id),
        Err(_) => {
            log::debug!("Ignoring malformed session cookie on {}", req.path());
            None
        }
    }
}

fn session_cookie(id: Uuid) -> Cookie<'static> {
    Cookie::build(SESSION_COOKIE, id.to_string())
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .finish()
}

impl<S, B> Service<ServiceRequest> for SessionMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let (session_id, is_new) = match session_from_cookie(&req) {
            Some(id) => (id, false),
            None => (Uuid::new_v4(), true),
        };
        req.extensions_mut().insert(SessionId(session_id));

        let fut = self.service.call(req);
        Box::pin(async move {
            let mut res = fut.await?;
            if is_new {
                log::debug!("Issued new session {}", session_id);
                if let Err(e) = res.response_mut().add_cookie(&session_cookie(session_id)) {
                    log::warn!("Failed to set session cookie: {}", e);
                }
            }
            Ok(res)
        })
    }
}

impl FromRequest for SessionId {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut actix_web::dev::Payload) -> Self::Future {
        match req.extensions().get::<SessionId>() {
            Some(session) => ok(*session),
            None => {
                // Without the middleware there is no stable identity; a fresh id
                // keeps the request isolated from every other client.
                log::warn!(
                    "No session found in request extensions for path: {}. Is SessionMiddleware mounted?",
                    req.path()
                );
                ok(SessionId(Uuid::new_v4()))
            }
        }
    }
}
