//! Installs the TLS handshake handler and its timing observer into a pipeline.
//!
//! Resulting order (transport end first):
//! ```text
//! [proxy] → [ssl-logging] → ssl → ssl-reader → ...              (no wire logging)
//! [proxy] → [ssl-logging] → ssl → ... → logging → ssl-reader → ...  (wire logging)
//! ```
//! `ssl-logging` is only added with `debug` and wire logging present.

use crate::net::RemoteAddress;
use crate::pipeline::{LoggingHandler, Pipeline, StageName};
use crate::tls::observer::HandshakeTimingObserver;
use crate::tls::{SslConfiguration, TlsError};

pub fn install(
    pipeline: &mut Pipeline,
    remote: Option<&RemoteAddress>,
    config: &SslConfiguration,
    debug: bool,
) -> Result<(), TlsError> {
    let sni = remote.and_then(RemoteAddress::sni_target);
    let mut handler = config.context().new_handler(sni.as_ref())?;

    tracing::debug!(
        connection_id = %pipeline.channel().id,
        engine = handler.engine_name(),
        sni = ?sni.as_ref().map(|t| t.host.as_str()),
        "Installing TLS handler"
    );

    config.configure(handler.as_mut());
    let handler = handler.into_handler();

    if pipeline.contains(StageName::ProxyHandler) {
        pipeline.add_after_boxed(StageName::ProxyHandler, StageName::SslHandler, handler)?;
    } else {
        pipeline.add_first_boxed(StageName::SslHandler, handler)?;
    }

    if pipeline.contains(StageName::LoggingHandler) {
        pipeline.add_after(StageName::LoggingHandler, StageName::SslReader, HandshakeTimingObserver::new())?;
        if debug {
            pipeline.add_before(StageName::SslHandler, StageName::SslLoggingHandler, LoggingHandler::tls())?;
        }
    } else {
        pipeline.add_after(StageName::SslHandler, StageName::SslReader, HandshakeTimingObserver::new())?;
    }
    Ok(())
}
