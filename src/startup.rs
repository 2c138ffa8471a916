use actix_web::dev::Server;
use actix_web::{web, App, HttpServer};
use std::net::TcpListener;

use crate::logger::LoggerMiddleware;
use crate::middleware::{Policy, RequireAuth};
use crate::routes::{
    admin_list_sessions, admin_revoke_session, health_check, list_my_sessions, login, logout, me,
    refresh, register, revoke_my_session,
};
use crate::state::AppState;

pub fn run(listener: TcpListener, state: AppState) -> Result<Server, std::io::Error> {
    let data = web::Data::new(state.clone());

    let server = HttpServer::new(move || {
        let gate = |policy: Policy| RequireAuth::new(state.codec.clone(), state.gate.clone(), policy);

        App::new()
            .wrap(LoggerMiddleware)
            .app_data(data.clone())
            .route("/health_check", web::get().to(health_check))
            .service(
                web::scope("/api/v1/auth")
                    // Public
                    .route("/register", web::post().to(register))
                    .route("/login", web::post().to(login))
                    .route("/refresh", web::post().to(refresh))
                    // Claims if present, cookies otherwise
                    .service(
                        web::resource("/logout")
                            .wrap(gate(Policy::authenticated().allow_anonymous()))
                            .route(web::post().to(logout)),
                    )
                    .service(
                        web::resource("/me")
                            .wrap(gate(Policy::authenticated()))
                            .route(web::get().to(me)),
                    )
                    .service(
                        web::scope("/sessions")
                            .wrap(gate(Policy::authenticated()))
                            .route("", web::get().to(list_my_sessions))
                            .route("/{id}", web::delete().to(revoke_my_session)),
                    ),
            )
            .service(
                web::scope("/api/v1/admin")
                    .wrap(gate(Policy::require_roles(["admin"])))
                    .route("/sessions", web::get().to(admin_list_sessions))
                    .route("/sessions/{id}", web::delete().to(admin_revoke_session)),
            )
    })
    .listen(listener)?
    .run();

    Ok(server)
}
