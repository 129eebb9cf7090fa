//! RAII guard for scoped session acquisition.

use std::ops::{Deref, DerefMut};

use log::warn;

use super::SshSession;
use crate::error::Result;
use crate::transport::{Connector, SshConnector};

/// One outstanding acquisition of an [`SshSession`].
///
/// Holds `&mut SshSession`, so the session can only be used through the
/// guard while it lives. Nested code can call [`SshSession::enter`] on the
/// guard again; the connection stays up until the outermost guard exits.
///
/// Call [`exit`](Self::exit) to release cleanly. A guard dropped without
/// `exit()` still releases its acquisition, but on the last release the
/// connection is dropped instead of disconnected gracefully.
pub struct SessionGuard<'a, C: Connector = SshConnector> {
    session: &'a mut SshSession<C>,
    consumed: bool,
}

impl<'a, C: Connector> SessionGuard<'a, C> {
    pub(super) fn new(session: &'a mut SshSession<C>) -> Self {
        Self {
            session,
            consumed: false,
        }
    }

    /// Release the acquisition, closing the connection if it was the last.
    ///
    /// Consumes the guard; it cannot be used after this.
    pub async fn exit(mut self) -> Result<()> {
        self.consumed = true;
        self.session.release().await
    }
}

impl<C: Connector> Deref for SessionGuard<'_, C> {
    type Target = SshSession<C>;

    fn deref(&self) -> &Self::Target {
        self.session
    }
}

impl<C: Connector> DerefMut for SessionGuard<'_, C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.session
    }
}

impl<C: Connector> Drop for SessionGuard<'_, C> {
    fn drop(&mut self) {
        if !self.consumed {
            warn!(
                "SessionGuard for {} dropped without explicit exit()",
                self.session.host()
            );
            self.session.release_abandoned();
        }
    }
}
