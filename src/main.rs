use clap::Parser;
use jobboard::cli::{
    Args, Services, build_config, build_identity_provider, build_mailer, handle_grant_admin,
    init_logging, load_jwt_secret, open_cache, open_database, validate_base_ui_host,
};
use jobboard::run_server;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    init_logging(&args.log_format);

    let Some(jwt_secret) = load_jwt_secret(args.jwt_secret_file.as_deref()) else {
        std::process::exit(1);
    };

    let Some(base_ui_host) = validate_base_ui_host(&args.base_ui_host) else {
        std::process::exit(1);
    };

    let Some(db) = open_database(&args.database).await else {
        std::process::exit(1);
    };

    let Some(cache) = open_cache(args.redis_url.as_deref()).await else {
        std::process::exit(1);
    };

    if let Some(email) = args.grant_admin.as_deref() {
        handle_grant_admin(&db, &cache, email).await;
    }

    let Some(mailer) = build_mailer(args.mail_relay_url.as_deref(), args.mail_from.as_deref())
    else {
        std::process::exit(1);
    };

    let Some(identity_provider) = build_identity_provider(&args.google_userinfo_url) else {
        std::process::exit(1);
    };

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            error!(address = %addr, error = %e, "Failed to bind");
            std::process::exit(1);
        });

    match listener.local_addr() {
        Ok(local_addr) => info!(address = %local_addr, "Listening"),
        Err(e) => error!(error = %e, "Failed to read local address"),
    }

    let services = Services {
        db,
        cache,
        mailer,
        identity_provider,
    };
    let config = build_config(&args, base_ui_host, jwt_secret, services);

    if let Err(e) = run_server(config, listener).await {
        error!(error = %e, "Server error");
        std::process::exit(1);
    }
}
