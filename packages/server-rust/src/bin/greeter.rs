//! Demo service: a greeter served over HTTP and managed by an `App`.
//!
//! ```text
//! greeter --addr 127.0.0.1:8000
//! curl -XPOST localhost:8000/helloworld.Greeter/SayHello -d '{"name":"strato"}'
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use strato_core::log::{default_logger, log_or_warn, with, Level, Value};
use strato_core::middleware::{logging, middleware_fn, recovery, Middleware};
use strato_core::registry::MemoryRegistrar;
use strato_core::{typed, CallContext, CallResult, Handler, Payload, Status};
use strato_server::app::AppInfo;
use strato_server::{hook_fn, App, HttpServer};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
struct Args {
    /// Listen address.
    #[arg(long, env = "GREETER_ADDR", default_value = "0.0.0.0:8000")]
    addr: String,

    /// Service name reported to the registry.
    #[arg(long, default_value = "helloworld")]
    name: String,

    /// Per-call timeout in milliseconds; 0 disables it.
    #[arg(long, default_value_t = 1000)]
    timeout_ms: u64,

    /// Bound on server shutdown in milliseconds; 0 waits indefinitely.
    #[arg(long, default_value_t = 5000)]
    stop_timeout_ms: u64,

    /// Token required by the admin operations.
    #[arg(long, env = "GREETER_ADMIN_TOKEN", default_value = "secret")]
    admin_token: String,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,
}

#[derive(Debug, Deserialize)]
struct HelloRequest {
    name: String,
}

#[derive(Debug, Serialize)]
struct HelloReply {
    message: String,
}

async fn say_hello(ctx: CallContext, req: HelloRequest) -> Result<HelloReply, Status> {
    if req.name.is_empty() {
        return Err(Status::invalid_argument("name must not be empty"));
    }
    ctx.transport()
        .reply_header()
        .set("x-served-by", ctx.transport().endpoint());
    Ok(HelloReply {
        message: format!("Hello {}", req.name),
    })
}

/// Rejects calls whose `authorization` header is not `Bearer <token>`.
fn require_token(token: String) -> Middleware {
    let expected = Arc::new(format!("Bearer {token}"));
    middleware_fn(move |next: Handler| {
        let expected = Arc::clone(&expected);
        let wrapped: Handler = Arc::new(
            move |ctx: CallContext, req: Payload| -> BoxFuture<'static, CallResult> {
                if ctx.transport().request_header().get("authorization") != *expected {
                    let denied: CallResult = Err(Status::unauthenticated("invalid token"));
                    return Box::pin(async move { denied });
                }
                next(ctx, req)
            },
        );
        wrapped
    })
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs);

    let started = Instant::now();
    let logger = with(
        default_logger(),
        vec![
            "service".into(),
            args.name.clone().into(),
            "uptime_ms".into(),
            Value::valuer(move || started.elapsed().as_millis().to_string()),
        ],
    );
    let registrar = Arc::new(MemoryRegistrar::new());

    let server = HttpServer::builder()
        .address(args.addr.clone())
        .timeout(Duration::from_millis(args.timeout_ms))
        .logger(Arc::clone(&logger))
        .middleware(vec![recovery::recovery(), logging::server(Arc::clone(&logger))])
        .middleware_for("/helloworld.Admin/*", vec![require_token(args.admin_token.clone())])
        .route("/helloworld.Greeter/SayHello", typed(say_hello))
        .route(
            "/helloworld.Admin/Instances",
            typed({
                let registrar = Arc::clone(&registrar);
                let name = args.name.clone();
                move |_ctx: CallContext, _req: Payload| {
                    let instances = registrar.instances(&name);
                    async move { Ok::<_, Status>(instances) }
                }
            }),
        )
        .build();

    let app = App::builder()
        .name(args.name.clone())
        .version(env!("CARGO_PKG_VERSION"))
        .metadata("transport", "http")
        .logger(Arc::clone(&logger))
        .registrar(registrar)
        .stop_timeout(Duration::from_millis(args.stop_timeout_ms))
        .server(Arc::new(server))
        .after_start(hook_fn(|ctx| async move {
            let app = ctx.app();
            tracing::info!(id = app.id(), endpoints = ?app.endpoints(), "greeter ready");
            Ok(())
        }))
        .after_stop({
            let logger = Arc::clone(&logger);
            hook_fn(move |_ctx| {
                let logger = Arc::clone(&logger);
                async move {
                    log_or_warn(logger.as_ref(), Level::Info, &[&"msg", &"greeter stopped"]);
                    Ok(())
                }
            })
        })
        .build()?;

    app.run().await?;
    Ok(())
}
