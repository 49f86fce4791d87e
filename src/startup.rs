use actix_web::dev::Server;
use actix_web::{web, App, HttpServer};
use std::net::TcpListener;

use crate::api_token::TokenManager;
use crate::logger::LoggerMiddleware;
use crate::routes::{
    create_api_token, find_api_token, get_api_token, health_check, list_api_tokens,
    revoke_api_token, update_api_token,
};

pub fn run(listener: TcpListener, manager: TokenManager) -> Result<Server, std::io::Error> {
    let manager = web::Data::new(manager);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(LoggerMiddleware)
            .app_data(manager.clone())
            .route("/health_check", web::get().to(health_check))
            .service(
                web::scope("/api-tokens")
                    .route("", web::post().to(create_api_token))
                    .route("", web::get().to(list_api_tokens))
                    // Before `/{id}`, which would otherwise capture it
                    .route("/lookup", web::get().to(find_api_token))
                    .route("/{id}", web::get().to(get_api_token))
                    .route("/{id}", web::put().to(update_api_token))
                    .route("/{id}", web::delete().to(revoke_api_token)),
            )
    })
    .listen(listener)?
    .run();

    Ok(server)
}
