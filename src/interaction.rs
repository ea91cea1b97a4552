//! The user-facing side of interactive grants: opening a browser, showing URLs and device
//! codes, and prompting for codes or credentials.

// std
use std::io::{self, BufRead, Write};
// self
use crate::{_prelude::*, oauth::DeviceAuthorization};

/// Boxed future returned by [`Interaction::prompt`].
pub type PromptFuture<'a> = Pin<Box<dyn Future<Output = Result<String>> + 'a + Send>>;

/// Values an interactive grant may ask the user for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Prompt {
	/// Authorization code pasted back after the manual flow.
	AuthorizationCode,
	/// Resource owner username.
	Username,
	/// Resource owner password.
	Password,
}
impl Prompt {
	/// Label printed before reading input.
	pub fn label(self) -> &'static str {
		match self {
			Prompt::AuthorizationCode => "Enter code: ",
			Prompt::Username => "Username: ",
			Prompt::Password => "Password: ",
		}
	}

	/// Whether the typed value must not be echoed.
	pub fn is_secret(self) -> bool {
		matches!(self, Prompt::Password)
	}
}

/// Environment the interactive grants talk to.
pub trait Interaction: Send + Sync {
	/// Opens `url` in a browser, using `command` instead of the system default when set.
	fn open_browser(&self, url: &str, command: Option<&str>) -> io::Result<()>;

	/// Tells the user to visit `url`, e.g. when the browser is not opened automatically.
	fn show_authorization_url(&self, url: &str);

	/// Shows the user code and verification URI of a device authorization.
	fn show_device_code(&self, authorization: &DeviceAuthorization);

	/// Reads one value from the user.
	fn prompt(&self, prompt: Prompt) -> PromptFuture<'_>;
}

/// [`Interaction`] on the controlling terminal: messages go to stderr, input comes from stdin.
///
/// Stdout is left alone because it carries the credential output.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConsoleInteraction;
impl Interaction for ConsoleInteraction {
	fn open_browser(&self, url: &str, command: Option<&str>) -> io::Result<()> {
		match command {
			Some(command) => open::with(url, command),
			None => open::that(url),
		}
	}

	fn show_authorization_url(&self, url: &str) {
		eprintln!("Please visit the following URL in your browser: {url}");
	}

	fn show_device_code(&self, authorization: &DeviceAuthorization) {
		eprintln!(
			"Please visit {} and enter the code: {}",
			authorization.verification_uri, authorization.user_code
		);
	}

	fn prompt(&self, prompt: Prompt) -> PromptFuture<'_> {
		Box::pin(async move {
			let line = tokio::task::spawn_blocking(move || {
				if prompt.is_secret() { read_hidden(prompt) } else { read_line(prompt.label()) }
			})
				.await
				.map_err(io::Error::other)
				.and_then(|read| read)
				.map_err(Error::Interaction)?;

			Ok(line)
		})
	}
}

fn read_line(label: &str) -> io::Result<String> {
	let mut stderr = io::stderr().lock();

	stderr.write_all(label.as_bytes())?;
	stderr.flush()?;

	let mut line = String::new();

	io::stdin().lock().read_line(&mut line)?;

	Ok(line.trim_end_matches(['\r', '\n']).to_owned())
}

// Renders on stderr and reads from the terminal with echo disabled.
fn read_hidden(prompt: Prompt) -> io::Result<String> {
	dialoguer::Password::new()
		.with_prompt(prompt.label().trim_end_matches([':', ' ']))
		.allow_empty_password(true)
		.interact()
		.map_err(io::Error::other)
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn only_the_password_is_read_without_echo() {
		assert!(Prompt::Password.is_secret());
		assert!(!Prompt::Username.is_secret());
		assert!(!Prompt::AuthorizationCode.is_secret());
	}
}
