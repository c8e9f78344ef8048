pub mod config;
pub mod events;
pub mod ids;
pub mod janitor;
pub mod models;
pub mod rate_limit;
pub mod registry;
pub mod routes;
pub mod share;
pub mod store;
pub mod validate;

use std::sync::Arc;

use config::AppConfig;
use rate_limit::{RateLimitConfig, RateLimiter};
use registry::Registry;
use rocket_cors::{AllowedOrigins, CorsOptions};
use share::ShareService;
use store::FileStore;

pub fn rocket() -> rocket::Rocket<rocket::Build> {
    build_rocket(AppConfig::from_env(), RateLimitConfig::from_env())
}

pub fn build_rocket(
    app_config: AppConfig,
    rate_config: RateLimitConfig,
) -> rocket::Rocket<rocket::Build> {
    let store = Arc::new(FileStore::new(&app_config).expect("Failed to create upload directory"));
    let orphans = store.cleanup_orphans();
    if orphans > 0 {
        println!("🧹 Startup: removed {orphans} orphaned upload blobs");
    }

    let registry = Arc::new(Registry::new(&app_config));
    let shares = Arc::new(ShareService::new(&app_config));
    let rate_limiter = Arc::new(RateLimiter::new(rate_config));

    let cors = match &app_config.allowed_origins {
        Some(origins) => CorsOptions {
            allowed_origins: AllowedOrigins::some_exact(origins),
            ..CorsOptions::default()
        },
        None => CorsOptions::default(),
    }
    .to_cors()
    .expect("Failed to create CORS");

    // Uploads land in a temp dir inside the upload dir so persisting is an
    // atomic rename; the form limit leaves headroom over the file cap so our
    // own size check produces the stable error code.
    let figment = rocket::Config::figment()
        .merge(("limits.file", app_config.max_file_size + 1024 * 1024))
        .merge(("limits.data-form", app_config.max_file_size + 2 * 1024 * 1024))
        .merge(("limits.json", 2 * 1024 * 1024))
        .merge(("temp_dir", store.temp_dir().to_string_lossy().to_string()));

    let janitor_registry = registry.clone();
    let janitor_store = store.clone();
    let janitor_shares = shares.clone();
    let sweeper_limiter = rate_limiter.clone();

    rocket::custom(figment)
        .manage(registry)
        .manage(store)
        .manage(shares)
        .manage(rate_limiter)
        .manage(app_config)
        .attach(cors)
        .register(
            "/",
            rocket::catchers![
                routes::not_found,
                routes::too_many_requests,
                routes::bad_request,
                routes::unprocessable,
                routes::payload_too_large,
            ],
        )
        .mount(
            "/",
            rocket::routes![
                routes::health,
                routes::stats,
                routes::session_socket,
                routes::upload_file,
                routes::download_file,
                routes::get_messages,
                routes::validate_user,
                routes::create_share,
                routes::list_shares,
                routes::get_share,
                routes::delete_share,
                routes::permanent_delete,
                routes::get_access_logs,
                routes::download_share,
            ],
        )
        .attach(rocket::fairing::AdHoc::on_liftoff("Janitor", move |_rocket| {
            Box::pin(async move {
                janitor::spawn_janitor(janitor_registry, janitor_store, janitor_shares);
                rate_limit::spawn_counter_sweeper(sweeper_limiter);
                println!("🧹 Janitor started (rooms 60s, files 10m, shares 60m)");
            })
        }))
}
