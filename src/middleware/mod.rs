/// Middleware module
///
/// Bearer-token guard for the protected routes.

mod jwt_middleware;

pub use jwt_middleware::JwtMiddleware;
