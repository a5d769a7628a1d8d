use std::process::exit;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use fanout_lambda::adapters::invoke::LocalWorkerInvoker;
use fanout_lambda::adapters::transport::{ReqwestTransport, Transport};
use fanout_lambda::handlers::entry::{handle_entry_event, EntrySettings};
use fanout_lambda::runtime::config::DispatchConfig;
use serde_json::{json, Map, Value};

#[derive(Parser)]
#[command(
    name = "fanout_local",
    about = "Run one recursive fan-out fetch in-process and print the response"
)]
struct Cli {
    /// Number of targets to generate from the url template
    #[arg(long, default_value_t = 100)]
    amount: usize,
    /// Url template; `{index}` and `{random}` are substituted per target
    #[arg(long, env = "FANOUT_URL_TEMPLATE")]
    url: Option<String>,
    /// Largest batch a worker fetches directly instead of recursing
    #[arg(long)]
    batch_size: Option<usize>,
    /// Targets admitted per window; 0 disables admission control
    #[arg(long)]
    rate_limit: Option<usize>,
    /// Dispatch preset: controlled, highly-recursive or wide
    #[arg(long, default_value = "controlled")]
    preset: String,
    /// Per-request HTTP timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut settings = match EntrySettings::from_env() {
        Ok(value) => value,
        Err(error) => fail(error.message()),
    };
    let preset = match DispatchConfig::preset(&cli.preset) {
        Some(value) => value,
        None => fail(&format!("unknown preset '{}'", cli.preset)),
    };
    settings.base_config = match preset.with_env_overrides(|key| std::env::var(key).ok()) {
        Ok(value) => value,
        Err(error) => fail(error.message()),
    };
    if let Some(url) = cli.url.clone() {
        settings.url_template = url;
    }

    let transport: Arc<dyn Transport> =
        match ReqwestTransport::new(cli.timeout_ms.map(Duration::from_millis)) {
            Ok(value) => Arc::new(value),
            Err(error) => fail(&error.to_string()),
        };
    let invoker = Arc::new(LocalWorkerInvoker::new(transport));

    let response = handle_entry_event(request_body(&cli), &settings, invoker).await;
    println!("{}", response.body);
    if response.status_code != 200 {
        exit(1);
    }
}

fn request_body(cli: &Cli) -> Value {
    let mut body = Map::new();
    body.insert("amount".to_string(), json!(cli.amount));
    if let Some(batch_size) = cli.batch_size {
        body.insert("batch_size".to_string(), json!(batch_size));
    }
    if let Some(rate_limit) = cli.rate_limit {
        body.insert("rate_limit".to_string(), json!(rate_limit));
    }
    Value::Object(body)
}

fn fail(message: &str) -> ! {
    eprintln!("error: {message}");
    exit(2);
}
