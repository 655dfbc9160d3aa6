use reqwest::redirect::Policy;
use reqwest::{Client, ClientBuilder};

#[derive(Default)]
pub struct HttpClientConfig {
  pub http_proxy: Option<String>,
  pub user: Option<String>,
  pub pass: Option<String>,
}

/// Outbound clients shared by every request. Both reuse keep-alive connections.
#[derive(Clone)]
pub struct UpstreamClients {
  gzip: Client,
  identity: Client,
}

impl UpstreamClients {
  pub fn select(&self, gzip: bool) -> &Client {
    if gzip {
      &self.gzip
    } else {
      &self.identity
    }
  }
}

impl HttpClientConfig {
  pub fn to_clients(self) -> Result<UpstreamClients, reqwest::Error> {
    Ok(UpstreamClients {
      gzip: self.builder(true)?.build()?,
      identity: self.builder(false)?.build()?,
    })
  }

  fn builder(&self, gzip: bool) -> Result<ClientBuilder, reqwest::Error> {
    let mut client_builder = reqwest::ClientBuilder::new();

    if let Some(proxy_url) = &self.http_proxy {
      let mut proxy = reqwest::Proxy::all(proxy_url.as_str())?;

      if let (Some(user_name), Some(password)) = (&self.user, &self.pass) {
        proxy = proxy.basic_auth(user_name, password);
      }

      client_builder = client_builder.proxy(proxy);
    }

    Ok(client_builder.gzip(gzip).redirect(Policy::limited(5)))
  }
}
