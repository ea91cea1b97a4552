//! Local redirect listener for the browser flow.
//!
//! The listener binds one loopback address, serves a single route and hands the first
//! authorization response back to the waiting flow through a one-shot channel. The wait
//! races that channel against cancellation and the authentication timeout; whichever wins,
//! the socket is closed before [`LocalServer::receive`] returns.

pub mod tls;

pub use tls::LocalTlsConfig;

// std
use std::{convert::Infallible, io, net::SocketAddr};
// crates.io
use tokio::{
	io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
	net::TcpListener,
	sync::oneshot,
	task::JoinSet,
};
use tokio_rustls::TlsAcceptor;
// self
use crate::{_prelude::*, error::BoxError, error::ProviderError};

/// Addresses tried in order when the caller configures none.
pub const DEFAULT_BIND_ADDRESSES: [&str; 2] = ["127.0.0.1:8000", "127.0.0.1:18000"];
/// Hostname used in the redirect URI.
pub const DEFAULT_REDIRECT_HOSTNAME: &str = "localhost";

const CALLBACK_PATH: &str = "/";
const MAX_REQUEST_HEAD: usize = 16 * 1024;
const ACCEPT_BACKOFF: StdDuration = StdDuration::from_millis(50);

const SUCCESS_PAGE: &str = "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>Authenticated</title></head><body><p>Authenticated. You can close this window.</p></body></html>";
const FAILURE_PAGE: &str = "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>Authentication failed</title></head><body><p>Authentication failed. Return to the terminal for details.</p></body></html>";

/// Failures that prevent the listener from starting.
#[derive(Debug, ThisError)]
pub enum ListenerError {
	/// None of the configured addresses could be bound.
	#[error("Could not bind the redirect listener to any of: {}.", .addresses.join(", "))]
	Bind {
		/// Addresses that were tried.
		addresses: Vec<String>,
		/// Failure from the last attempt.
		#[source]
		source: io::Error,
	},
	/// The local certificate or key could not be loaded.
	#[error("Failed to load local TLS material from {}.", .path.display())]
	Tls {
		/// File that failed to load.
		path: PathBuf,
		/// Underlying read, parse or configuration failure.
		#[source]
		source: BoxError,
	},
	/// The redirect URI could not be derived from the bound address.
	#[error("Failed to derive the redirect URI.")]
	RedirectUri {
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// The listener stopped without a result.
	#[error("The redirect listener closed before an authorization response arrived.")]
	Abandoned,
}

/// Lifecycle of one listener, reported in debug events.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListenerState {
	/// Socket bound, waiting for the redirect.
	Listening,
	/// An authorization response (or error) was handed to the flow.
	Delivered,
	/// The authentication timeout fired first.
	TimedOut,
	/// The caller cancelled first.
	Cancelled,
	/// Socket released.
	Closed,
}

/// Listener settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalServerConfig {
	/// Candidate `host:port` addresses; the first that binds is used.
	pub bind_addresses: Vec<String>,
	/// Hostname placed in the redirect URI.
	pub redirect_hostname: String,
	/// Serve HTTPS with this certificate/key pair.
	pub tls: Option<LocalTlsConfig>,
	/// Redirect the browser here after a successful delivery instead of showing a page.
	pub success_redirect_url: Option<Url>,
}
impl Default for LocalServerConfig {
	fn default() -> Self {
		Self {
			bind_addresses: DEFAULT_BIND_ADDRESSES.iter().map(|addr| (*addr).to_owned()).collect(),
			redirect_hostname: DEFAULT_REDIRECT_HOSTNAME.into(),
			tls: None,
			success_redirect_url: None,
		}
	}
}

/// A bound redirect listener.
pub struct LocalServer {
	listener: TcpListener,
	acceptor: Option<TlsAcceptor>,
	local_addr: SocketAddr,
	redirect_uri: Url,
	success_redirect_url: Option<Url>,
}
impl LocalServer {
	/// Binds the first configured address that is available.
	pub async fn bind(config: &LocalServerConfig) -> Result<Self, ListenerError> {
		let acceptor = config.tls.as_ref().map(tls::acceptor).transpose()?;
		let mut last_error = None;

		for address in &config.bind_addresses {
			let listener = match TcpListener::bind(address.as_str()).await {
				Ok(listener) => listener,
				Err(e) => {
					tracing::debug!(
						address = %address,
						error = %e,
						"Redirect listener bind failed."
					);

					last_error = Some(e);

					continue;
				},
			};
			let local_addr = listener
				.local_addr()
				.map_err(|source| ListenerError::Bind {
					addresses: vec![address.clone()],
					source,
				})?;
			let scheme = if acceptor.is_some() { "https" } else { "http" };
			let redirect_uri = Url::parse(&format!(
				"{scheme}://{}:{}{CALLBACK_PATH}",
				config.redirect_hostname,
				local_addr.port()
			))
			.map_err(|source| ListenerError::RedirectUri { source })?;

			tracing::debug!(
				state = ?ListenerState::Listening,
				%local_addr,
				redirect_uri = %redirect_uri,
				"Redirect listener bound."
			);

			return Ok(Self {
				listener,
				acceptor,
				local_addr,
				redirect_uri,
				success_redirect_url: config.success_redirect_url.clone(),
			});
		}

		Err(ListenerError::Bind {
			addresses: config.bind_addresses.clone(),
			source: last_error.unwrap_or_else(|| {
				io::Error::new(io::ErrorKind::AddrNotAvailable, "no bind address configured")
			}),
		})
	}

	/// Address the socket is bound to.
	pub fn local_addr(&self) -> SocketAddr {
		self.local_addr
	}

	/// Redirect URI to register in the authorization request.
	pub fn redirect_uri(&self) -> &Url {
		&self.redirect_uri
	}

	/// Serves redirects until one delivers, `timeout` elapses or `cancel` fires.
	///
	/// A delivery that landed before cancellation fired wins; otherwise cancellation takes
	/// precedence, and a delivery beats the timeout. The listener is consumed and its socket
	/// closed on return.
	pub async fn receive(
		self,
		expected_state: &str,
		timeout: StdDuration,
		cancel: &CancellationToken,
	) -> Result<String> {
		let (sender, mut receiver) = oneshot::channel();
		let exchange = Arc::new(Exchange::new(expected_state, sender, self.success_redirect_url));
		let Self { listener, acceptor, local_addr, .. } = self;
		let (outcome, state) = tokio::select! {
			biased;
			_ = cancel.cancelled() => settle_cancelled(&mut receiver),
			delivered = &mut receiver => (
				delivered.unwrap_or_else(|_| Err(ListenerError::Abandoned.into())),
				ListenerState::Delivered,
			),
			_ = tokio::time::sleep(timeout) =>
				(Err(Error::Timeout { after: timeout }), ListenerState::TimedOut),
			never = serve(&listener, acceptor.as_ref(), &exchange) => match never {},
		};

		tracing::debug!(state = ?state, %local_addr, "Redirect listener finished.");
		drop(listener);
		tracing::debug!(state = ?ListenerState::Closed, %local_addr, "Redirect listener closed.");

		outcome
	}
}
impl Debug for LocalServer {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("LocalServer")
			.field("local_addr", &self.local_addr)
			.field("redirect_uri", &self.redirect_uri.as_str())
			.field("tls", &self.acceptor.is_some())
			.finish()
	}
}

/// State shared by every connection of one listener.
struct Exchange {
	expected_state: String,
	delivery: Mutex<Option<oneshot::Sender<Result<String>>>>,
	success_redirect_url: Option<Url>,
}
impl Exchange {
	fn new(
		expected_state: &str,
		sender: oneshot::Sender<Result<String>>,
		success_redirect_url: Option<Url>,
	) -> Self {
		Self {
			expected_state: expected_state.to_owned(),
			delivery: Mutex::new(Some(sender)),
			success_redirect_url,
		}
	}

	/// Decides the reply for one request and, for the first complete authorization
	/// response, claims the delivery slot.
	fn handle(&self, method: &str, target: &str) -> Handled {
		if method != "GET" {
			return Handled::reply(Reply::text(405, "Method Not Allowed", "Method not allowed."));
		}

		let Ok(url) = Url::parse("http://localhost").and_then(|base| base.join(target)) else {
			return Handled::reply(Reply::text(400, "Bad Request", "Malformed request target."));
		};

		if url.path() != CALLBACK_PATH {
			return Handled::reply(Reply::text(404, "Not Found", "Not found."));
		}

		let callback = Callback::parse(&url);

		if matches!(callback, Callback::Incomplete) {
			return Handled::reply(Reply::text(
				400,
				"Bad Request",
				"The authorization response carries neither a code nor an error.",
			));
		}

		let Some(sender) = self.delivery.lock().take() else {
			return Handled::reply(Reply::text(
				409,
				"Conflict",
				"This authorization response was already handled.",
			));
		};
		let (reply, result) = match callback {
			Callback::Code { code, state } if state_matches(&self.expected_state, &state) => {
				let reply = match &self.success_redirect_url {
					Some(location) => Reply::redirect(location),
					None => Reply::html(200, "OK", SUCCESS_PAGE),
				};

				(reply, Ok(code))
			},
			Callback::Denied { error, description, state }
				if state_matches(&self.expected_state, &state) =>
				(
					Reply::html(200, "OK", FAILURE_PAGE),
					Err(ProviderError::AuthorizationDenied { error, description }.into()),
				),
			_ => (Reply::html(400, "Bad Request", FAILURE_PAGE), Err(Error::Csrf)),
		};

		Handled { reply, delivery: Some((sender, result)) }
	}
}

enum Callback {
	Code { code: String, state: String },
	Denied { error: String, description: Option<String>, state: String },
	Incomplete,
}
impl Callback {
	fn parse(url: &Url) -> Self {
		let mut code = None;
		let mut state = None;
		let mut error = None;
		let mut description = None;

		for (key, value) in url.query_pairs() {
			match key.as_ref() {
				"code" => code = Some(value.into_owned()),
				"state" => state = Some(value.into_owned()),
				"error" => error = Some(value.into_owned()),
				"error_description" => description = Some(value.into_owned()),
				_ => {},
			}
		}

		let state = state.unwrap_or_default();

		match (error, code) {
			(Some(error), _) => Self::Denied { error, description, state },
			(None, Some(code)) => Self::Code { code, state },
			(None, None) => Self::Incomplete,
		}
	}
}

struct Handled {
	reply: Reply,
	delivery: Option<(oneshot::Sender<Result<String>>, Result<String>)>,
}
impl Handled {
	fn reply(reply: Reply) -> Self {
		Self { reply, delivery: None }
	}
}

struct Reply {
	status: u16,
	reason: &'static str,
	content_type: &'static str,
	location: Option<String>,
	body: String,
}
impl Reply {
	fn html(status: u16, reason: &'static str, body: &str) -> Self {
		Self {
			status,
			reason,
			content_type: "text/html; charset=utf-8",
			location: None,
			body: body.to_owned(),
		}
	}

	fn text(status: u16, reason: &'static str, body: &str) -> Self {
		Self {
			status,
			reason,
			content_type: "text/plain; charset=utf-8",
			location: None,
			body: body.to_owned(),
		}
	}

	fn redirect(location: &Url) -> Self {
		Self {
			status: 302,
			reason: "Found",
			content_type: "text/plain; charset=utf-8",
			location: Some(location.to_string()),
			body: String::new(),
		}
	}

	fn to_bytes(&self) -> Vec<u8> {
		let mut head = format!(
			"HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nCache-Control: no-store\r\nConnection: close\r\n",
			self.status,
			self.reason,
			self.content_type,
			self.body.len()
		);

		if let Some(location) = &self.location {
			head.push_str(&format!("Location: {location}\r\n"));
		}

		head.push_str("\r\n");

		let mut bytes = head.into_bytes();

		bytes.extend_from_slice(self.body.as_bytes());

		bytes
	}
}

async fn serve(
	listener: &TcpListener,
	acceptor: Option<&TlsAcceptor>,
	exchange: &Arc<Exchange>,
) -> Infallible {
	let mut connections = JoinSet::new();

	loop {
		tokio::select! {
			accepted = listener.accept() => match accepted {
				Ok((stream, peer)) => {
					let exchange = Arc::clone(exchange);
					let acceptor = acceptor.cloned();

					connections.spawn(async move {
						let served = match acceptor {
							Some(acceptor) => match acceptor.accept(stream).await {
								Ok(stream) => handle_connection(stream, &exchange).await,
								Err(e) => Err(e),
							},
							None => handle_connection(stream, &exchange).await,
						};

						if let Err(e) = served {
							tracing::debug!(%peer, error = %e, "Redirect connection failed.");
						}
					});
				},
				Err(e) => back_off_after_accept_error(&e).await,
			},
			Some(_) = connections.join_next() => {},
		}
	}
}

// Persistent failures such as EMFILE would otherwise spin the accept loop.
async fn back_off_after_accept_error(error: &io::Error) {
	tracing::warn!(error = %error, "Failed to accept a redirect connection.");

	tokio::time::sleep(ACCEPT_BACKOFF).await;
}

fn settle_cancelled(
	receiver: &mut oneshot::Receiver<Result<String>>,
) -> (Result<String>, ListenerState) {
	match receiver.try_recv() {
		Ok(delivered) => (delivered, ListenerState::Delivered),
		Err(_) => (Err(Error::Cancelled), ListenerState::Cancelled),
	}
}

async fn handle_connection<S>(mut stream: S, exchange: &Exchange) -> io::Result<()>
where
	S: AsyncRead + AsyncWrite + Unpin,
{
	let Some(request_line) = read_request_line(&mut stream).await? else {
		return Ok(());
	};
	let mut parts = request_line.split_whitespace();
	let method = parts.next().unwrap_or_default();
	let target = parts.next().unwrap_or_default();
	let Handled { reply, delivery } = exchange.handle(method, target);

	tracing::debug!(method, status = reply.status, "Redirect request served.");

	// The reply goes out before delivery; delivery ends the serve loop and aborts this task.
	let written = write_reply(&mut stream, &reply).await;

	if let Some((sender, result)) = delivery {
		let _ = sender.send(result);
	}

	written
}

async fn read_request_line<S>(stream: &mut S) -> io::Result<Option<String>>
where
	S: AsyncRead + Unpin,
{
	let mut head = Vec::with_capacity(1024);
	let mut chunk = [0_u8; 1024];

	loop {
		let read = stream.read(&mut chunk).await?;

		if read == 0 {
			break;
		}

		head.extend_from_slice(&chunk[..read]);

		if head.windows(4).any(|window| window == b"\r\n\r\n") || head.len() >= MAX_REQUEST_HEAD {
			break;
		}
	}

	let Some(end) = head.windows(2).position(|window| window == b"\r\n") else {
		return Ok(None);
	};

	Ok(Some(String::from_utf8_lossy(&head[..end]).into_owned()))
}

async fn write_reply<S>(stream: &mut S, reply: &Reply) -> io::Result<()>
where
	S: AsyncWrite + Unpin,
{
	stream.write_all(&reply.to_bytes()).await?;
	stream.flush().await?;
	stream.shutdown().await
}

/// Byte-for-byte comparison whose duration does not depend on where the inputs differ.
fn state_matches(expected: &str, actual: &str) -> bool {
	expected.len() == actual.len()
		&& expected.bytes().zip(actual.bytes()).fold(0_u8, |acc, (a, b)| acc | (a ^ b)) == 0
}

#[cfg(test)]
mod tests {
	// crates.io
	use tokio::net::TcpStream;
	// self
	use super::*;

	fn exchange() -> (Exchange, oneshot::Receiver<Result<String>>) {
		let (sender, receiver) = oneshot::channel();

		(Exchange::new("expected-state", sender, None), receiver)
	}

	fn loopback_config() -> LocalServerConfig {
		LocalServerConfig { bind_addresses: vec!["127.0.0.1:0".into()], ..Default::default() }
	}

	async fn get(addr: SocketAddr, target: &str) -> String {
		let mut stream = TcpStream::connect(addr).await.expect("Listener should accept.");

		stream
			.write_all(format!("GET {target} HTTP/1.1\r\nHost: localhost\r\n\r\n").as_bytes())
			.await
			.expect("Request should be written.");

		let mut response = String::new();

		stream.read_to_string(&mut response).await.expect("Response should be readable.");

		response
	}

	#[test]
	fn second_delivery_is_rejected() {
		let (exchange, _receiver) = exchange();
		let first = exchange.handle("GET", "/?code=abc&state=expected-state");
		let second = exchange.handle("GET", "/?code=abc&state=expected-state");

		assert_eq!(first.reply.status, 200);
		assert!(matches!(first.delivery, Some((_, Ok(ref code))) if code == "abc"));
		assert_eq!(second.reply.status, 409);
		assert!(second.delivery.is_none());
	}

	#[test]
	fn state_mismatch_is_csrf_with_generic_page() {
		let (exchange, _receiver) = exchange();
		let handled = exchange.handle("GET", "/?code=abc&state=forged");

		assert!(matches!(handled.delivery, Some((_, Err(Error::Csrf)))));
		assert_eq!(handled.reply.body, FAILURE_PAGE);
		assert!(!handled.reply.body.contains("state"));

		let missing = self::exchange().0.handle("GET", "/?code=abc");

		assert!(matches!(missing.delivery, Some((_, Err(Error::Csrf)))));
	}

	#[test]
	fn stray_requests_do_not_deliver() {
		let (exchange, _receiver) = exchange();

		assert_eq!(exchange.handle("GET", "/favicon.ico").reply.status, 404);
		assert_eq!(exchange.handle("GET", "/").reply.status, 400);
		assert_eq!(exchange.handle("POST", "/?code=abc&state=expected-state").reply.status, 405);
		assert!(exchange.delivery.lock().is_some());
	}

	#[test]
	fn provider_error_is_delivered_as_denial() {
		let (exchange, _receiver) = exchange();
		let handled = exchange
			.handle("GET", "/?error=access_denied&error_description=nope&state=expected-state");

		assert!(matches!(
			handled.delivery,
			Some((_, Err(Error::Provider(ProviderError::AuthorizationDenied { .. }))))
		));
	}

	#[test]
	fn success_redirect_replaces_the_page() {
		let (sender, _receiver) = oneshot::channel();
		let location = Url::parse("https://dashboard.example.com/").expect("URL should parse.");
		let exchange = Exchange::new("s", sender, Some(location));
		let handled = exchange.handle("GET", "/?code=c&state=s");

		assert_eq!(handled.reply.status, 302);
		assert_eq!(handled.reply.location.as_deref(), Some("https://dashboard.example.com/"));
	}

	#[test]
	fn state_comparison_is_exact() {
		assert!(state_matches("abc", "abc"));
		assert!(!state_matches("abc", "abd"));
		assert!(!state_matches("abc", "abcd"));
		assert!(!state_matches("abc", "ABC"));
	}

	#[tokio::test]
	async fn delivers_the_code_over_http() {
		let server = LocalServer::bind(&loopback_config()).await.expect("Listener should bind.");
		let addr = server.local_addr();
		let cancel = CancellationToken::new();

		assert_eq!(server.redirect_uri().as_str(), format!("http://localhost:{}/", addr.port()));

		let client = tokio::spawn(async move {
			let stray = get(addr, "/favicon.ico").await;
			let delivered = get(addr, "/?code=the-code&state=s1").await;

			(stray, delivered)
		});
		let code = server
			.receive("s1", StdDuration::from_secs(10), &cancel)
			.await
			.expect("Code should be delivered.");
		let (stray, delivered) = client.await.expect("Client task should finish.");

		assert_eq!(code, "the-code");
		assert!(stray.starts_with("HTTP/1.1 404"));
		assert!(delivered.starts_with("HTTP/1.1 200"));
		assert!(delivered.contains("Authenticated."));
	}

	#[tokio::test]
	async fn timeout_releases_the_socket() {
		let server = LocalServer::bind(&loopback_config()).await.expect("Listener should bind.");
		let addr = server.local_addr();
		let err = server
			.receive("s", StdDuration::from_millis(50), &CancellationToken::new())
			.await
			.expect_err("Nobody redirects, so the wait must time out.");

		assert!(matches!(err, Error::Timeout { .. }));
		assert!(TcpListener::bind(addr).await.is_ok(), "Address should be free again.");
	}

	#[tokio::test]
	async fn cancellation_beats_timeout() {
		let server = LocalServer::bind(&loopback_config()).await.expect("Listener should bind.");
		let addr = server.local_addr();
		let cancel = CancellationToken::new();

		cancel.cancel();

		let err = server
			.receive("s", StdDuration::ZERO, &cancel)
			.await
			.expect_err("Cancelled wait must fail.");

		assert!(matches!(err, Error::Cancelled));
		assert!(TcpListener::bind(addr).await.is_ok(), "Address should be free again.");
	}

	#[tokio::test(start_paused = true)]
	async fn accept_errors_pause_before_retrying() {
		let started = tokio::time::Instant::now();

		back_off_after_accept_error(&io::Error::other("Too many open files.")).await;

		assert!(started.elapsed() >= ACCEPT_BACKOFF);
	}

	#[test]
	fn delivery_received_before_cancellation_wins() {
		let (sender, mut receiver) = oneshot::channel();

		sender.send(Ok("early-code".to_owned())).expect("Receiver should be alive.");

		let (outcome, state) = settle_cancelled(&mut receiver);

		assert!(matches!(outcome, Ok(ref code) if code == "early-code"));
		assert_eq!(state, ListenerState::Delivered);

		let (_sender, mut empty) = oneshot::channel::<Result<String>>();
		let (outcome, state) = settle_cancelled(&mut empty);

		assert!(matches!(outcome, Err(Error::Cancelled)));
		assert_eq!(state, ListenerState::Cancelled);
	}

	#[tokio::test]
	async fn falls_back_to_the_next_bind_address() {
		let occupied = TcpListener::bind("127.0.0.1:0").await.expect("Blocker should bind.");
		let taken = occupied.local_addr().expect("Blocker should have an address.").to_string();
		let config = LocalServerConfig {
			bind_addresses: vec![taken, "127.0.0.1:0".into()],
			..Default::default()
		};
		let server = LocalServer::bind(&config).await.expect("Second address should bind.");

		assert_ne!(Some(server.local_addr()), occupied.local_addr().ok());

		let err = LocalServer::bind(&LocalServerConfig {
			bind_addresses: vec![],
			..Default::default()
		})
		.await
		.expect_err("No address means no listener.");

		assert!(matches!(err, ListenerError::Bind { .. }));
	}
}
