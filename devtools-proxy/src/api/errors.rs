//! This module defines the [`Error`] a client session may encounter while its
//! frames are relayed. It further provides a method to transform the
//! encountered errors into a close frame if necessary.

use std::io::ErrorKind;

use axum::extract::ws::{CloseFrame, close_code};
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::error::ProtocolError;

use crate::id_codec::IdOverflow;

/// All errors that may occur while relaying one client's session.
#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    #[error("Connection closed by peer")]
    ConnectionClosed,
    #[error("upstream socket closed")]
    UpstreamClosed,
    #[error(transparent)]
    Axum(#[from] axum::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[cfg(feature = "simd-json")]
    #[error(transparent)]
    SimdJson(#[from] simd_json::Error),
    #[error("message carries no usable id")]
    MissingId,
    #[error(transparent)]
    IdOverflow(#[from] IdOverflow),
}

impl Error {
    /// Transforms the error into a [`CloseFrame`] for the client if
    /// necessary.
    pub(crate) fn into_close_frame(self) -> Option<CloseFrame> {
        tracing::debug!("{self:?}");
        match self {
            Error::ConnectionClosed | Error::UpstreamClosed => {
                // nothing to tell the peer; the socket just goes away
                None
            }
            Error::Axum(axum_error) => {
                // try down casting if close-without-handshake
                let inner = axum_error.into_inner();
                if let Some(tungstenite::Error::Protocol(
                    ProtocolError::ResetWithoutClosingHandshake,
                )) = inner.downcast_ref()
                {
                    tracing::trace!("nothing to do, client closed session (tungstenite error)");
                    None
                } else if let Some(io_err) = inner.downcast_ref::<std::io::Error>()
                    && io_err.kind() == ErrorKind::ConnectionReset
                {
                    tracing::trace!("nothing to do, client closed session (os error)");
                    None
                } else {
                    Some(CloseFrame {
                        code: close_code::ERROR,
                        reason: "unexpected error".into(),
                    })
                }
            }
            Error::Json(err) => Some(CloseFrame {
                code: close_code::INVALID,
                reason: err.to_string().into(),
            }),
            #[cfg(feature = "simd-json")]
            Error::SimdJson(err) => Some(CloseFrame {
                code: close_code::INVALID,
                reason: err.to_string().into(),
            }),
            Error::MissingId => Some(CloseFrame {
                code: close_code::POLICY,
                reason: "message carries no usable id".into(),
            }),
            Error::IdOverflow(err) => Some(CloseFrame {
                code: close_code::POLICY,
                reason: err.to_string().into(),
            }),
        }
    }
}
