// # herocertd - Certificate Daemon
//
// Thin integration layer: all issuance logic lives in herocert-core. This
// binary only reads the environment, wires the concrete collaborators
// together and maps the outcome to an exit code.
//
// Two modes, selected with `HEROCERT_MODE`:
//
// - `issue` (default): one issuance run, meant for a scheduled task. Exits
//   immediately when the current certificate is outside the renewal window.
// - `serve`: answers HTTP-01 requests for the artifact published in
//   `ACME_CHALLENGE_FILENAME` / `ACME_CHALLENGE_FILE_CONTENT` and redirects
//   everything else to HTTPS. Listens on `PORT`.
//
// ## Configuration
//
// ### Platform
// - `HEROKU_TOKEN`: Platform API token
// - `HEROKU_APP`: Application name
//
// ### ACME
// - `ACME_EMAIL`: Account contact
// - `ACME_DOMAIN`: Comma-separated list of domains
// - `ACME_ENDPOINT`: Directory URL (default: Let's Encrypt production)
// - `ACME_CHALLENGE`: `file` or `dns`
// - `ACME_TERMS_AGREED`: Agree to the CA's terms of service
// - `ACME_CERT_EXPIRES_AT`: Expiry of the installed certificate (RFC 3339)
// - `ACME_RENEWAL_WINDOW_DAYS`: Renew this many days before expiry
//
// ### DNS Provider (dns challenge)
// - `CLOUDFLARE_API_TOKEN`, or `CLOUDFLARE_EMAIL` + `CLOUDFLARE_API_KEY`
// - `CLOUDFLARE_ZONE_ID`: Zone ID (optional)
//
// ### Daemon
// - `HEROCERT_MODE`: `issue` or `serve`
// - `HEROCERT_LOG_LEVEL`: trace, debug, info, warn, error
// - `HEROCERT_STORE_PATH`: Pending-certificate file (optional)
// - `PORT`: Listen port for `serve`
//
// ## Example
//
// ```bash
// export HEROKU_TOKEN=your_token
// export HEROKU_APP=my-app
// export ACME_EMAIL=ops@example.com
// export ACME_DOMAIN=example.com,www.example.com
// export ACME_TERMS_AGREED=true
//
// herocertd
// ```

use anyhow::Result;
use axum::Router;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode, Uri, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Redirect, Response};
use herocert_acme::InstantAcmeService;
use herocert_core::traits::{CertificatePlatform, ChallengeResponder};
use herocert_core::{
    AcmeConfig, ChallengeSlot, ChallengeType, DnsResponder, EngineEvent, ErrorKind,
    FileCertificateStore, FileResponder, IssuanceEngine, IssuanceOutcome, ProviderRegistry,
};
use herocert_heroku::{HerokuPlatform, HttpChallengeProbe};
use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

const DEFAULT_PORT: u16 = 5000;

/// Exit codes for the scheduled task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HerocertExitCode {
    /// Run finished (issued, recovered, or not due)
    Success = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Issuance failed
    RuntimeError = 2,
}

impl From<HerocertExitCode> for ExitCode {
    fn from(code: HerocertExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Issue,
    Serve,
}

/// Daemon-level settings, separate from the issuance configuration
struct DaemonSettings {
    mode: Mode,
    log_level: Level,
    port: u16,
}

impl DaemonSettings {
    fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mode = match lookup("HEROCERT_MODE")
            .unwrap_or_else(|| "issue".to_string())
            .to_lowercase()
            .as_str()
        {
            "issue" => Mode::Issue,
            "serve" => Mode::Serve,
            other => anyhow::bail!(
                "HEROCERT_MODE '{}' is not valid. Valid modes: issue, serve",
                other
            ),
        };

        let log_level = match lookup("HEROCERT_LOG_LEVEL")
            .unwrap_or_else(|| "info".to_string())
            .to_lowercase()
            .as_str()
        {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            other => anyhow::bail!(
                "HEROCERT_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                other
            ),
        };

        let port = match lookup("PORT") {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a port number. Got: {}", raw))?,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            mode,
            log_level,
            port,
        })
    }
}

fn main() -> ExitCode {
    let settings = match DaemonSettings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return HerocertExitCode::ConfigError.into();
        }
    };

    let config = match AcmeConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return HerocertExitCode::ConfigError.into();
        }
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(settings.log_level)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return HerocertExitCode::ConfigError.into();
    }

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return HerocertExitCode::RuntimeError.into();
        }
    };

    let code = rt.block_on(async {
        match settings.mode {
            Mode::Issue => run_issue(config).await,
            Mode::Serve => match serve(config, settings.port).await {
                Ok(()) => HerocertExitCode::Success,
                Err(e) => {
                    error!("Responder error: {}", e);
                    HerocertExitCode::RuntimeError
                }
            },
        }
    });

    code.into()
}

/// One issuance run, mapped to an exit code
async fn run_issue(config: AcmeConfig) -> HerocertExitCode {
    if let Err(e) = config.validate() {
        error!("Configuration validation error: {}", e);
        return HerocertExitCode::ConfigError;
    }

    // Skip account registration entirely when nothing is due
    if !config.needs_renewal(chrono::Utc::now()) {
        info!(
            "Certificate for {} valid until {}, renewal not due",
            config.domains.join(", "),
            config
                .cert_expires_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_default()
        );
        return HerocertExitCode::Success;
    }

    match issue(config).await {
        Ok(outcome) => {
            match outcome {
                IssuanceOutcome::NotDue { .. } => info!("Renewal not due"),
                IssuanceOutcome::Recovered { domains, .. } => {
                    info!("Uploaded pending certificate for {}", domains.join(", "))
                }
                IssuanceOutcome::Issued {
                    domains,
                    expires_at,
                } => info!(
                    "Issued certificate for {} (expires {})",
                    domains.join(", "),
                    expires_at.map(|t| t.to_rfc3339()).unwrap_or_default()
                ),
            }
            HerocertExitCode::Success
        }
        Err(e) => {
            error!("Issuance failed: {}", e);
            exit_code_for(&e)
        }
    }
}

fn exit_code_for(error: &anyhow::Error) -> HerocertExitCode {
    match error.downcast_ref::<herocert_core::Error>() {
        Some(e) if e.kind() == ErrorKind::Config => HerocertExitCode::ConfigError,
        _ => HerocertExitCode::RuntimeError,
    }
}

/// Wire the collaborators and run the engine once
async fn issue(config: AcmeConfig) -> Result<IssuanceOutcome> {
    let registry = ProviderRegistry::new();

    #[cfg(feature = "cloudflare")]
    {
        info!("Registering Cloudflare provider");
        herocert_provider_cloudflare::register(&registry);
    }

    let platform: Arc<dyn CertificatePlatform> = Arc::new(HerokuPlatform::new(&config.platform)?);

    let challenge_type = config
        .challenge_type
        .ok_or_else(|| herocert_core::Error::config("ACME_CHALLENGE must be 'file' or 'dns'"))?;

    let responder: Arc<dyn ChallengeResponder> = match challenge_type {
        ChallengeType::File => {
            Arc::new(FileResponder::new(ChallengeSlot::new()).with_platform(platform.clone()))
        }
        ChallengeType::Dns => {
            let provider_config = config.dns_provider.as_ref().ok_or_else(|| {
                herocert_core::Error::config("DNS challenge requires DNS provider credentials")
            })?;
            let provider = registry.create_provider(provider_config)?;
            info!("Using DNS provider: {}", provider.provider_name());
            Arc::new(DnsResponder::new(
                provider,
                config.timing.propagation_delay(),
            ))
        }
    };

    let acme =
        InstantAcmeService::connect(&config.directory_url, &config.email, config.terms_agreed)
            .await?;

    let store = match &config.store_path {
        Some(path) => Some(FileCertificateStore::new(path).await?),
        None => None,
    };

    let (mut engine, mut events) = IssuanceEngine::new(config, Box::new(acme), responder, platform)?;
    engine = engine.with_probe(Box::new(HttpChallengeProbe::new()?));
    if let Some(store) = store {
        engine = engine.with_store(Box::new(store));
    }

    let log_events = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            log_event(&event);
        }
    });

    let outcome = engine.run_now().await;
    drop(engine);
    if let Err(e) = log_events.await {
        warn!("Event logger stopped abnormally: {}", e);
    }

    Ok(outcome?)
}

fn log_event(event: &EngineEvent) {
    match event {
        EngineEvent::Started { domains } => info!("Run started for {}", domains.join(", ")),
        EngineEvent::NotDue { .. } => info!("Renewal not due"),
        EngineEvent::OrderCreated { order_url } => info!("Order created: {}", order_url),
        EngineEvent::ChallengeActivated {
            domain,
            challenge_type,
        } => info!("{} challenge published for {}", challenge_type, domain),
        EngineEvent::ChallengeValidated { domain } => info!("Validated {}", domain),
        EngineEvent::CertificateIssued { domains, .. } => {
            info!("Certificate issued for {}", domains.join(", "))
        }
        EngineEvent::CertificateUploaded { domains } => {
            info!("Certificate installed for {}", domains.join(", "))
        }
        EngineEvent::Failed { kind, error } => error!("Run failed ({:?}): {}", kind, error),
    }
}

/// Serve the published challenge until SIGTERM/SIGINT
async fn serve(config: AcmeConfig, port: u16) -> Result<()> {
    let slot = ChallengeSlot::from_config(&config);
    match slot.current() {
        Some(file) => info!("Serving challenge at {}", file.request_path()),
        None => info!("No challenge configured, redirecting all requests"),
    }

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("Listening on port {}", port);

    axum::serve(listener, challenge_router(slot))
        .with_graceful_shutdown(async {
            match wait_for_shutdown().await {
                Ok(signal) => info!("Received shutdown signal: {}", signal),
                Err(e) => error!("Shutdown error: {}", e),
            }
        })
        .await?;

    Ok(())
}

/// Challenge responder in front of the HTTPS redirect
fn challenge_router(slot: ChallengeSlot) -> Router {
    Router::new()
        .fallback(redirect_to_https)
        .layer(middleware::from_fn_with_state(slot, serve_challenge))
}

async fn serve_challenge(State(slot): State<ChallengeSlot>, request: Request, next: Next) -> Response {
    match slot.respond(request.uri().path()) {
        Some(answer) => (
            StatusCode::from_u16(answer.status).unwrap_or(StatusCode::OK),
            [(header::CONTENT_TYPE, answer.content_type)],
            answer.body,
        )
            .into_response(),
        None => next.run(request).await,
    }
}

async fn redirect_to_https(headers: HeaderMap, uri: Uri) -> Response {
    let already_https = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("https"));
    if already_https {
        return StatusCode::NOT_FOUND.into_response();
    }

    let Some(host) = headers.get(header::HOST).and_then(|v| v.to_str().ok()) else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    Redirect::permanent(&format!("https://{}{}", host, path)).into_response()
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use herocert_core::ChallengeFile;
    use std::collections::HashMap;
    use tower::ServiceExt;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn active_slot() -> ChallengeSlot {
        let slot = ChallengeSlot::new();
        slot.set(ChallengeFile::new(
            ".well-known/acme-challenge/token-1",
            "token-1.thumbprint",
        ));
        slot
    }

    fn get(path: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .uri(path)
            .header(header::HOST, "example.com")
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn test_settings_defaults() {
        let settings = DaemonSettings::from_lookup(lookup(&[])).unwrap();
        assert_eq!(settings.mode, Mode::Issue);
        assert_eq!(settings.log_level, Level::INFO);
        assert_eq!(settings.port, DEFAULT_PORT);
    }

    #[test]
    fn test_settings_serve_mode_and_port() {
        let settings = DaemonSettings::from_lookup(lookup(&[
            ("HEROCERT_MODE", "serve"),
            ("HEROCERT_LOG_LEVEL", "DEBUG"),
            ("PORT", "8080"),
        ]))
        .unwrap();
        assert_eq!(settings.mode, Mode::Serve);
        assert_eq!(settings.log_level, Level::DEBUG);
        assert_eq!(settings.port, 8080);
    }

    #[test]
    fn test_settings_reject_unknown_values() {
        assert!(DaemonSettings::from_lookup(lookup(&[("HEROCERT_MODE", "renew")])).is_err());
        assert!(DaemonSettings::from_lookup(lookup(&[("HEROCERT_LOG_LEVEL", "loud")])).is_err());
        assert!(DaemonSettings::from_lookup(lookup(&[("PORT", "http")])).is_err());
    }

    #[test]
    fn test_config_errors_exit_with_config_code() {
        let err = anyhow::Error::from(herocert_core::Error::config("ACME_EMAIL is required"));
        assert_eq!(exit_code_for(&err), HerocertExitCode::ConfigError);

        let err = anyhow::Error::from(herocert_core::Error::verification("example.com", "invalid"));
        assert_eq!(exit_code_for(&err), HerocertExitCode::RuntimeError);
    }

    #[tokio::test]
    async fn test_invalid_config_exits_before_network() {
        let config = AcmeConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(run_issue(config).await, HerocertExitCode::ConfigError);
    }

    #[tokio::test]
    async fn test_not_due_exits_cleanly_without_network() {
        let expires = chrono::Utc::now() + chrono::Duration::days(80);
        let config = AcmeConfig::new("token", "my-app", "ops@example.com", vec!["example.com".into()])
            .with_cert_expires_at(expires);
        assert_eq!(run_issue(config).await, HerocertExitCode::Success);
    }

    #[tokio::test]
    async fn test_router_serves_active_challenge() {
        let response = challenge_router(active_slot())
            .oneshot(get("/.well-known/acme-challenge/token-1"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"token-1.thumbprint");
    }

    #[tokio::test]
    async fn test_router_redirects_other_paths_to_https() {
        let response = challenge_router(active_slot())
            .oneshot(get("/login?next=%2F"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PERMANENT_REDIRECT);
        assert_eq!(
            response.headers()[header::LOCATION],
            "https://example.com/login?next=%2F"
        );
    }

    #[tokio::test]
    async fn test_router_redirects_once_challenge_cleared() {
        let slot = active_slot();
        let router = challenge_router(slot.clone());
        slot.clear();

        let response = router
            .oneshot(get("/.well-known/acme-challenge/token-1"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PERMANENT_REDIRECT);
    }

    #[tokio::test]
    async fn test_router_behind_tls_does_not_loop() {
        let request = axum::http::Request::builder()
            .uri("/anything")
            .header(header::HOST, "example.com")
            .header("x-forwarded-proto", "https")
            .body(Body::empty())
            .unwrap();

        let response = challenge_router(ChallengeSlot::new())
            .oneshot(request)
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
