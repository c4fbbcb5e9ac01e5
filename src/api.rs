use std::{sync::Arc, time::Instant};

use log::info;
use poem::{
    get, handler,
    http::{header, HeaderMap},
    middleware::CatchPanic,
    web::Data,
    Endpoint, EndpointExt, Request, Response, Result, Route,
};
use tera::Tera;

use crate::{
    client_ip::{self, header_lossy, TrustedProxies, X_REAL_IP},
    logging::AccessLog,
    providers::IpgeoProvider,
    visitor::VisitorInfo,
};

/// Shared by every request; nothing in here changes after startup.
#[derive(Debug, Clone)]
pub struct AppState {
    geoip: Arc<IpgeoProvider>,
    trusted_proxies: Arc<TrustedProxies>,
    templates: Arc<Tera>,
}

impl AppState {
    pub fn new(geoip: IpgeoProvider, trusted_proxies: TrustedProxies, templates: Tera) -> Self {
        Self {
            geoip: Arc::new(geoip),
            trusted_proxies: Arc::new(trusted_proxies),
            templates: Arc::new(templates),
        }
    }

    pub fn visitor_info(&self, peer: &str, headers: &HeaderMap) -> VisitorInfo {
        let ip = client_ip::client_ip(
            peer,
            header_lossy(headers, X_REAL_IP).as_deref(),
            &self.trusted_proxies,
        );
        let location = self.geoip.resolve(&ip);

        VisitorInfo {
            ip,
            user_agent: header_lossy(headers, header::USER_AGENT.as_str())
                .unwrap_or_default()
                .into_owned(),
            country: location.country,
            city: location.city,
        }
    }
}

pub fn app(state: AppState) -> impl Endpoint {
    let trusted_proxies = state.trusted_proxies.clone();
    protect(Route::new().at("/", get(index)).data(state), trusted_proxies)
}

/// Recovers panics into 500 responses, inside the access log so those get logged too.
fn protect<E: Endpoint + 'static>(ep: E, trusted_proxies: Arc<TrustedProxies>) -> impl Endpoint {
    ep.with(CatchPanic::new())
        .with(AccessLog::new(trusted_proxies))
}

#[handler]
async fn index(req: &Request, Data(state): Data<&AppState>) -> Result<Response> {
    let start = Instant::now();

    let info = state.visitor_info(&client_ip::peer_addr(req), req.headers());
    let response = info.respond(
        req.header(header::ACCEPT).unwrap_or_default(),
        &state.templates,
    )?;

    info!(
        "event=handled ip={} method={} path={} duration={:?}",
        info.ip,
        req.method(),
        req.uri().path(),
        start.elapsed()
    );

    Ok(response)
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use poem::{
        http::{HeaderValue, StatusCode},
        listener::{Acceptor, Listener, TcpListener},
        test::TestClient,
        Server,
    };
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpStream,
    };

    use super::*;
    use crate::{client_ip::DEFAULT_TRUSTED_PROXIES, templates::TEMPLATE_NAME};

    fn state() -> AppState {
        let mut templates = Tera::default();
        templates
            .add_raw_template(
                TEMPLATE_NAME,
                "<dl><dd>{{ ip }}</dd><dd>{{ user_agent }}</dd><dd>{{ country }}</dd><dd>{{ city }}</dd></dl>",
            )
            .unwrap();

        AppState::new(
            IpgeoProvider::Unavailable,
            TrustedProxies::parse(DEFAULT_TRUSTED_PROXIES).unwrap(),
            templates,
        )
    }

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.insert(*name, value.parse().unwrap());
        }
        headers
    }

    #[test]
    fn test_visitor_from_untrusted_peer() {
        let info = state().visitor_info(
            "8.8.8.8:40000",
            &headers(&[("x-real-ip", "1.2.3.4"), ("user-agent", "curl/8.4.0")]),
        );
        assert_eq!(
            info,
            VisitorInfo {
                ip: "8.8.8.8".into(),
                user_agent: "curl/8.4.0".into(),
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_visitor_from_trusted_peer() {
        let info = state().visitor_info("172.18.0.7:40000", &headers(&[("x-real-ip", "8.8.8.8")]));
        assert_eq!(info.ip, "8.8.8.8");
        assert_eq!(info.user_agent, "");
    }

    #[test]
    fn test_plain_text_scenario() {
        let state = state();
        let info = state.visitor_info("127.0.0.1:40000", &headers(&[("user-agent", "test/1.0")]));
        let response = info.respond("text/plain", &state.templates).unwrap();
        assert_eq!(response.content_type(), Some("text/plain"));
        assert_eq!(
            info.to_plain_text(),
            "Visitor IP: 127.0.0.1\nUser-Agent: test/1.0\nCountry: \nCity: \n"
        );
    }

    #[test]
    fn test_visitor_keeps_non_ascii_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "user-agent",
            HeaderValue::from_bytes("Mozilla/5.0 Café".as_bytes()).unwrap(),
        );
        headers.insert("x-real-ip", HeaderValue::from_bytes("ïp".as_bytes()).unwrap());

        let info = state().visitor_info("172.18.0.7:40000", &headers);
        assert_eq!(info.user_agent, "Mozilla/5.0 Café");
        assert_eq!(info.ip, "ïp");
    }

    async fn serve(state: AppState, host: &str) -> SocketAddr {
        let acceptor = TcpListener::bind(format!("{host}:0"))
            .into_acceptor()
            .await
            .unwrap();
        let addr = *acceptor.local_addr()[0].as_socket_addr().unwrap();
        tokio::spawn(Server::new_with_acceptor(acceptor).run(app(state)));
        addr
    }

    /// Sends a raw HTTP/1.1 `GET /` and returns the status line and body.
    async fn fetch(addr: SocketAddr, headers: &[(&str, &str)]) -> (String, String) {
        let mut request = String::from("GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n");
        for (name, value) in headers {
            request.push_str(&format!("{name}: {value}\r\n"));
        }
        request.push_str("\r\n");

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();

        let (head, body) = response.split_once("\r\n\r\n").unwrap();
        let status = head.lines().next().unwrap_or_default().to_owned();
        (status, body.to_owned())
    }

    fn loopback_state(trusted_proxies: &str) -> AppState {
        AppState {
            trusted_proxies: Arc::new(TrustedProxies::parse(trusted_proxies).unwrap()),
            ..state()
        }
    }

    #[tokio::test]
    async fn test_index_json() {
        let addr = serve(state(), "127.0.0.1").await;

        let (status, body) = fetch(
            addr,
            &[
                ("Accept", "text/html, application/json"),
                ("User-Agent", "curl/8.4.0"),
            ],
        )
        .await;
        assert_eq!(status, "HTTP/1.1 200 OK");

        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["ip"], "127.0.0.1");
        assert_eq!(json["user_agent"], "curl/8.4.0");
        assert!(json.get("country").is_none());
        assert!(json.get("city").is_none());
    }

    #[tokio::test]
    async fn test_socket_peer_untrusted_ignores_header() {
        let addr = serve(state(), "127.0.0.1").await;

        let (_, body) = fetch(
            addr,
            &[("Accept", "application/json"), ("X-Real-IP", "1.2.3.4")],
        )
        .await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["ip"], "127.0.0.1");
    }

    #[tokio::test]
    async fn test_socket_peer_trusted_uses_header() {
        let addr = serve(loopback_state("127.0.0.0/8"), "127.0.0.1").await;

        let (_, body) = fetch(
            addr,
            &[("Accept", "application/json"), ("X-Real-IP", "8.8.8.8")],
        )
        .await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["ip"], "8.8.8.8");

        // No header, the peer itself
        let (_, body) = fetch(addr, &[("Accept", "text/plain"), ("User-Agent", "t/1")]).await;
        assert_eq!(
            body,
            "Visitor IP: 127.0.0.1\nUser-Agent: t/1\nCountry: \nCity: \n"
        );
    }

    #[tokio::test]
    #[ignore = "needs an IPv6 loopback interface"]
    async fn test_socket_peer_ipv6() {
        let addr = serve(loopback_state("::1"), "[::1]").await;

        let (_, body) = fetch(
            addr,
            &[("Accept", "application/json"), ("X-Real-IP", "9.9.9.9")],
        )
        .await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["ip"], "9.9.9.9");

        let addr = serve(state(), "[::1]").await;
        let (_, body) = fetch(
            addr,
            &[("Accept", "application/json"), ("X-Real-IP", "9.9.9.9")],
        )
        .await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["ip"], "::1");
    }

    #[tokio::test]
    async fn test_index_plain_text() {
        let cli = TestClient::new(app(state()));

        let resp = cli
            .get("/")
            .header("Accept", "text/plain")
            .header("User-Agent", "curl/8.4.0")
            .send()
            .await;
        resp.assert_status_is_ok();
        resp.assert_content_type("text/plain");

        let body = resp.0.into_body().into_string().await.unwrap();
        let lines = body.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("Visitor IP: "));
        assert_eq!(lines[1], "User-Agent: curl/8.4.0");
        assert_eq!(lines[2], "Country: ");
        assert_eq!(lines[3], "City: ");
    }

    #[tokio::test]
    async fn test_index_html_by_default() {
        let cli = TestClient::new(app(state()));

        let resp = cli.get("/").header("User-Agent", "Mozilla/5.0").send().await;
        resp.assert_status_is_ok();
        resp.assert_content_type("text/html; charset=utf-8");

        let body = resp.0.into_body().into_string().await.unwrap();
        assert!(body.contains("<dd>Mozilla&#x2F;5.0</dd>"));
    }

    #[tokio::test]
    async fn test_index_is_idempotent() {
        let cli = TestClient::new(app(state()));

        let mut bodies = vec![];
        for _ in 0..2 {
            let resp = cli
                .get("/")
                .header("Accept", "text/plain")
                .header("User-Agent", "curl/8.4.0")
                .send()
                .await;
            bodies.push(resp.0.into_body().into_string().await.unwrap());
        }
        assert_eq!(bodies[0], bodies[1]);
    }

    #[tokio::test]
    async fn test_unknown_path() {
        let cli = TestClient::new(app(state()));
        cli.get("/favicon.ico")
            .send()
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_panic_becomes_500() {
        #[handler]
        async fn boom() -> &'static str {
            panic!("boom")
        }

        let ep = protect(Route::new().at("/", get(boom)), Arc::new(TrustedProxies::default()));
        let cli = TestClient::new(ep);
        cli.get("/")
            .send()
            .await
            .assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_render_failure_becomes_500() {
        let state = AppState::new(
            IpgeoProvider::Unavailable,
            TrustedProxies::default(),
            Tera::default(),
        );
        let cli = TestClient::new(app(state));
        cli.get("/")
            .send()
            .await
            .assert_status(StatusCode::INTERNAL_SERVER_ERROR);

        // Other representations don't need the template
        cli.get("/")
            .header("Accept", "application/json")
            .send()
            .await
            .assert_status_is_ok();
    }
}
