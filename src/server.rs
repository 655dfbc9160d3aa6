use crate::error::ProxyError;
use crate::proxy_service::proxy_route_service::{read_inbound, ProxyRouteService};
use crate::throttle::{throttle_requests, Throttle};
use actix_cors::Cors;
use actix_web::http::header::ContentType;
use actix_web::middleware::{from_fn, Compress, Logger};
use actix_web::{guard, web, App, HttpRequest, HttpResponse, HttpServer};
use log::info;

pub struct ListenConfig {
  pub bind: String,
  pub port: u16,
  pub worker_count: usize,
}

pub const PROXY_ROUTES: [&str; 2] = ["/{proxykey}", "/{proxykey}/{tail:.*}"];

/// Landing page plus the proxy routes. Expects `web::Data<ProxyRouteService>` in app data.
pub fn routes(cfg: &mut web::ServiceConfig) {
  cfg.route("/", web::get().to(landing)).service(
    web::resource(PROXY_ROUTES.to_vec())
      .guard(
        guard::Any(guard::Get())
          .or(guard::Post())
          .or(guard::Put())
          .or(guard::Delete())
          .or(guard::Head())
          .or(guard::Options()),
      )
      .to(proxy_handler),
  );
}

pub async fn serve(listen: ListenConfig, service: ProxyRouteService) -> std::io::Result<()> {
  let ListenConfig {
    bind,
    port,
    worker_count,
  } = listen;
  let cors_sites = service.settings().cors_sites.clone();
  let name = service.settings().name.clone();
  let throttle = service.settings().throttle.clone().map(|settings| web::Data::new(Throttle::new(settings)));
  let service = web::Data::new(service);

  let server = HttpServer::new(move || {
    let mut app = App::new().app_data(service.clone());
    if let Some(throttle) = &throttle {
      app = app.app_data(throttle.clone());
    }

    app
      .wrap(from_fn(throttle_requests))
      .wrap(Logger::default())
      .wrap(Compress::default())
      .wrap(cors(&cors_sites))
      .configure(routes)
  })
  .workers(worker_count)
  .bind((bind.as_str(), port))?;

  info!("{} is listening on {}:{}", name, bind, port);
  server.run().await
}

async fn landing(service: web::Data<ProxyRouteService>) -> HttpResponse {
  HttpResponse::Ok()
    .insert_header(ContentType::plaintext())
    .body(format!("Welcome to {}", service.settings().name))
}

async fn proxy_handler(
  req: HttpRequest,
  payload: web::Payload,
  service: web::Data<ProxyRouteService>,
) -> Result<HttpResponse, ProxyError> {
  let target = service.resolve(req.match_info().get("proxykey").unwrap_or_default())?;
  let inbound = read_inbound(&req, payload, service.max_body_size()).await?;
  service.exec(&target, inbound).await
}

fn cors(sites: &[String]) -> Cors {
  if sites.iter().any(|site| site == "*") {
    return Cors::permissive();
  }

  sites.iter().fold(
    Cors::default().allow_any_method().allow_any_header(),
    |cors, site| cors.allowed_origin(site),
  )
}
