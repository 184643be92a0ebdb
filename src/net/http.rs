//! reqwest-backed fetcher.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::ACCESS_CONTROL_ALLOW_ORIGIN;
use reqwest::Client;
use url::{Origin, Url};

use super::{FetchRequest, FetchResponse, Fetcher, Priority, RequestMode, ResponseType};

/// Fetcher that performs real HTTP requests on behalf of the app origin.
#[derive(Clone)]
pub struct HttpFetcher {
  client: Client,
  app_origin: Origin,
}

impl HttpFetcher {
  pub fn new(app_origin: &Url) -> Result<Self> {
    let client = Client::builder()
      .user_agent(concat!("tilecache/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      app_origin: app_origin.origin(),
    })
  }
}

#[async_trait]
impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse> {
    if request.priority == Priority::Low {
      // Let interactive requests queued on the runtime go first
      tokio::task::yield_now().await;
    }

    let response = self
      .client
      .request(request.method.clone(), request.url.clone())
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", request.url, e))?;

    let allow_origin = response
      .headers()
      .get(ACCESS_CONTROL_ALLOW_ORIGIN)
      .and_then(|v| v.to_str().ok())
      .map(String::from);

    // Redirects are followed, so the final URL decides the origin
    let response_type = match response_type_for(
      &self.app_origin,
      request.mode,
      response.url(),
      allow_origin.as_deref(),
    )? {
      ResponseType::Opaque => return Ok(FetchResponse::opaque()),
      other => other,
    };

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
      .collect();
    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", request.url, e))?
      .to_vec();

    Ok(FetchResponse {
      status,
      response_type,
      headers,
      body,
    })
  }
}

/// Decide the response type the way a browser would, from the URL the
/// response was finally served from.
///
/// Errors mean the response must be treated as a network failure.
fn response_type_for(
  app_origin: &Origin,
  mode: RequestMode,
  response_url: &Url,
  allow_origin: Option<&str>,
) -> Result<ResponseType> {
  if response_url.origin() == *app_origin {
    return Ok(ResponseType::Basic);
  }

  match mode {
    RequestMode::SameOrigin => Err(eyre!(
      "Cross-origin response from {} in same-origin mode",
      response_url
    )),
    RequestMode::NoCors => Ok(ResponseType::Opaque),
    RequestMode::Cors => match allow_origin {
      Some("*") => Ok(ResponseType::Cors),
      Some(origin) if origin == app_origin.ascii_serialization() => Ok(ResponseType::Cors),
      _ => Err(eyre!("CORS check failed for {}", response_url)),
    },
  }
}
