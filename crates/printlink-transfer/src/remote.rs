//! Remote byte streams.
//!
//! The [`RemoteStore`] trait is the seam between transfer workers and the
//! network: open a download stream, or push an upload body. Production uses
//! [`UreqRemote`]; tests inject scripted streams (stalls, short reads,
//! failures).

use std::io::Read;
use std::time::Duration;

use crate::error::{TransferError, TransferResult};

/// An open download: a reader plus the advertised length, when known.
pub struct DownloadStream {
    /// Body reader. Blocking, with a socket read timeout applied.
    pub reader: Box<dyn Read + Send>,
    /// `Content-Length`, when the server sent one.
    pub total_bytes: Option<u64>,
}

/// Network access for transfer workers.
pub trait RemoteStore: Send + Sync {
    /// Opens a download stream for `url`.
    fn open_download(&self, url: &str, token: Option<&str>) -> TransferResult<DownloadStream>;

    /// Uploads a body read from `body` to `url`.
    ///
    /// The worker hands in a reader that applies throttling, cancellation
    /// and progress accounting on every `read` call.
    fn upload(
        &self,
        url: &str,
        token: Option<&str>,
        body: Box<dyn Read + Send>,
        total_bytes: Option<u64>,
    ) -> TransferResult<()>;
}

/// Blocking HTTP remote over `ureq`.
pub struct UreqRemote {
    agent: ureq::Agent,
}

impl UreqRemote {
    /// Creates a remote whose sockets time out after `read_timeout` of
    /// silence, so a stalled peer surfaces as an I/O error within the
    /// transfer inactivity window.
    pub fn new(read_timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(10))
            .timeout_read(read_timeout)
            .build();
        Self { agent }
    }

    fn apply_token(request: ureq::Request, token: Option<&str>) -> ureq::Request {
        match token {
            Some(token) => request.set("Token", token),
            None => request,
        }
    }
}

impl RemoteStore for UreqRemote {
    fn open_download(&self, url: &str, token: Option<&str>) -> TransferResult<DownloadStream> {
        let request = Self::apply_token(self.agent.get(url), token);
        let response = request
            .call()
            .map_err(|err| TransferError::Remote(err.to_string()))?;
        let total_bytes = response
            .header("Content-Length")
            .and_then(|v| v.parse::<u64>().ok());
        Ok(DownloadStream {
            reader: Box::new(response.into_reader()),
            total_bytes,
        })
    }

    fn upload(
        &self,
        url: &str,
        token: Option<&str>,
        body: Box<dyn Read + Send>,
        total_bytes: Option<u64>,
    ) -> TransferResult<()> {
        let mut request = Self::apply_token(self.agent.put(url), token)
            .set("Content-Type", "application/octet-stream");
        if let Some(total) = total_bytes {
            request = request.set("Content-Length", &total.to_string());
        }
        request
            .send(body)
            .map_err(|err| TransferError::Remote(err.to_string()))?;
        Ok(())
    }
}
