use clap::Parser;
use keyed_proxy::error::ConfigError;
use keyed_proxy::http_client::HttpClientConfig;
use keyed_proxy::proxy_service::proxy_config::ProxySettings;
use keyed_proxy::proxy_service::proxy_route_service::ProxyRouteService;
use keyed_proxy::route_config::ProxyConfigFile;
use keyed_proxy::server::{self, ListenConfig};
use keyed_proxy::std_logger;
use log::{error, LevelFilter};
use std::io::{ErrorKind, Result};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version, about = "Forwards /{proxykey}/... requests to whitelisted backends")]
struct Cli {
  /// YAML file with the target table and default request params.
  #[arg(long, env = "PROXY_CONFIG", default_value = "config.yaml")]
  config: PathBuf,
  #[arg(long, env = "HTTP_BIND", default_value = "0.0.0.0")]
  bind: String,
  #[arg(long, env = "HTTP_PORT", default_value_t = 9010)]
  port: u16,
  #[arg(long, env = "HTTP_WORKER_COUNT", default_value_t = 4)]
  workers: usize,
  /// Largest accepted request body, in bytes.
  #[arg(long, env = "HTTP_MAX_BODY_SIZE", default_value_t = 2 * 1024 * 1024)]
  max_body_size: usize,
  #[arg(long, env = "LOG_LEVEL", default_value = "info", value_parser = parse_level)]
  log_level: LevelFilter,
  /// Route every upstream call through this http or socks proxy.
  #[arg(long, env = "HTTP_PROXY_URL")]
  upstream_proxy: Option<String>,
  #[arg(long, env = "HTTP_PROXY_USER")]
  upstream_proxy_user: Option<String>,
  #[arg(long, env = "HTTP_PROXY_PASS", hide_env_values = true)]
  upstream_proxy_pass: Option<String>,
}

#[actix_web::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();

  std_logger::init(cli.log_level)
    .map_err(|err| std::io::Error::new(ErrorKind::Other, err.to_string()))?;

  let service = match build_service(&cli) {
    Ok(service) => service,
    Err(err) => {
      error!("{}", err);
      return Err(err.into());
    }
  };

  let listen = ListenConfig {
    bind: cli.bind,
    port: cli.port,
    worker_count: cli.workers,
  };

  server::serve(listen, service).await
}

fn build_service(cli: &Cli) -> std::result::Result<ProxyRouteService, ConfigError> {
  let config = ProxyConfigFile::load_from_file(&cli.config)?;
  let settings = ProxySettings::try_from(config)?;

  let clients = HttpClientConfig {
    http_proxy: cli.upstream_proxy.clone(),
    user: cli.upstream_proxy_user.clone(),
    pass: cli.upstream_proxy_pass.clone(),
  }
  .to_clients()?;

  Ok(ProxyRouteService::new(settings, clients, cli.max_body_size))
}

fn parse_level(value: &str) -> std::result::Result<LevelFilter, String> {
  value
    .parse::<LevelFilter>()
    .map_err(|_| format!("unknown log level '{}'", value))
}
