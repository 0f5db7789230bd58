#[macro_use]
extern crate lazy_static;
use actix_identity::IdentityMiddleware;
use actix_session::{storage::CookieSessionStore, SessionMiddleware};

use std::{env, str::FromStr};
use tera::Tera;

mod db;
mod errors;
mod routes;
mod structs;
mod utils;
#[cfg(test)]
mod tests;

use actix_files::{Files, NamedFile};
use actix_web::{
    cookie::Key,
    http::{Method, StatusCode},
    middleware,
    web::{self, Data},
    App, Either, HttpResponse, HttpServer, Responder,
};
use log::info;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode},
    SqlitePool,
};

#[derive(Debug, Clone)]
pub struct AppState {
    db_pool: SqlitePool,
    upload_dir: String,
}

lazy_static! {
    pub static ref TEMPLATES: Tera = {
        let mut tera = match Tera::new("templates/**/*") {
            Ok(t) => t,
            Err(e) => {
                log::error!("Parsing error(s): {}", e);
                ::std::process::exit(1);
            }
        };
        tera.autoescape_on(vec![".html", ".sql"]);
        tera.register_filter("format_number", utils::format_number_filter);
        tera
    };
}

fn get_session_key() -> Key {
    let key_str = env::var("SESSION_KEY").unwrap_or_else(|_| {
        log::error!("FATAL: SESSION_KEY environment variable not set");
        std::process::exit(1);
    });
    Key::from(key_str.as_bytes())
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let database_url =
        env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://loanbook.db".to_owned());

    let opts = SqliteConnectOptions::from_str(&database_url)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        // The schema declares FK relationships for documentation, but the
        // app relies on SQLite's native default (enforcement off) so that
        // delete_borrower can leave orphaned device rows in place. sqlx
        // enables enforcement by default, so restore the expected default.
        .foreign_keys(false)
        .read_only(false)
        .busy_timeout(std::time::Duration::from_secs(5));

    let db_pool = SqlitePool::connect_with(opts)
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

    db::init_db(&db_pool).await?;
    info!("Database ready at {}", database_url);

    let upload_dir = env::var("UPLOAD_DIR").unwrap_or_else(|_| "static/uploads".to_owned());
    std::fs::create_dir_all(&upload_dir)?;

    info!("Starting HTTP server on http://localhost:8080/");

    HttpServer::new(move || {
        App::new()
            // enable automatic response compression - usually register this first
            .wrap(middleware::Compress::default())
            .wrap(IdentityMiddleware::default())
            .wrap(SessionMiddleware::new(
                CookieSessionStore::default(),
                get_session_key(),
            ))
            // enable logger - always register Actix Web Logger middleware last
            .wrap(middleware::Logger::default())
            .service(Files::new("/static", "static"))
            .service(routes::favicon_handler)
            .service(routes::index_handler)
            .service(routes::login_handler)
            .service(routes::login_form_handler)
            .service(routes::forgot_password_handler)
            .service(routes::forgot_password_form_handler)
            .service(routes::dashboard_handler)
            .service(routes::check_name_handler)
            .service(routes::add_loan_handler)
            .service(routes::add_loan_form_handler)
            .service(routes::add_payment_handler)
            .service(routes::add_payment_form_handler)
            .service(routes::update_loan_form_handler)
            .service(routes::delete_borrower_form_handler)
            .service(routes::delete_payment_form_handler)
            .service(routes::delete_device_form_handler)
            .service(routes::edit_borrower_handler)
            .service(routes::edit_borrower_form_handler)
            .service(routes::edit_payment_handler)
            .service(routes::edit_payment_form_handler)
            .service(routes::loan_status_handler)
            .service(routes::device_details_handler)
            .service(routes::update_user_handler)
            .service(routes::update_user_form_handler)
            .app_data(Data::new(AppState {
                db_pool: db_pool.clone(),
                upload_dir: upload_dir.clone(),
            }))
            .default_service(web::to(default_handler))
    })
    .bind(("0.0.0.0", 8080))?
    .run()
    .await
}

async fn default_handler(req_method: Method) -> Result<impl Responder, std::io::Error> {
    match req_method {
        Method::GET => {
            let file = NamedFile::open("static/404.html")?
                .customize()
                .with_status(StatusCode::NOT_FOUND);
            Ok(Either::Left(file))
        }
        _ => Ok(Either::Right(HttpResponse::MethodNotAllowed().finish())),
    }
}
