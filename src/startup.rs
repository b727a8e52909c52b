use actix_web::dev::Server;
use actix_web::{web, App, HttpServer};
use std::net::TcpListener;

use crate::logger::LoggerMiddleware;
use crate::middleware::JwtMiddleware;
use crate::routes::{
    check_token, delete_account, get_current_user, health_check, login, logout, refresh, register,
    revoke_token, token_revoked, update_password,
};
use crate::session::SessionEngine;

pub fn run(listener: TcpListener, engine: web::Data<SessionEngine>) -> Result<Server, std::io::Error> {
    let server = HttpServer::new(move || {
        App::new()
            .wrap(LoggerMiddleware)
            .app_data(engine.clone())
            // Public routes
            .route("/health_check", web::get().to(health_check))
            .route("/auth/register", web::post().to(register))
            .route("/auth/login", web::post().to(login))
            .route("/auth/refresh", web::post().to(refresh))
            .route("/auth/check", web::post().to(check_token))
            .route("/auth/tokens/{token_id}/revoked", web::get().to(token_revoked))
            // Protected routes (bearer access token)
            .service(
                web::scope("/api")
                    .wrap(JwtMiddleware::new(engine.clone()))
                    .route("/me", web::get().to(get_current_user))
                    .route("/logout", web::post().to(logout))
                    .route("/password", web::put().to(update_password))
                    .route("/account", web::delete().to(delete_account))
                    .route("/tokens/{token_id}/revoke", web::post().to(revoke_token)),
            )
    })
    .listen(listener)?
    .run();

    Ok(server)
}
