//! Lazy remote connection handling.

use rowship_common::Result;
use rowship_writer::RemoteTableService;

/// Builds remote service connections.
///
/// The builder itself is immutable and cheap; the owned connection is
/// only established on first use and torn down explicitly at run end.
pub trait RemoteClientBuilder {
    type Client: RemoteTableService;

    fn connect(&self) -> Result<Self::Client>;
}

/// A connection slot that dials on first use.
pub struct LazyRemote<'b, B: RemoteClientBuilder> {
    builder: &'b B,
    client: Option<B::Client>,
}

impl<'b, B: RemoteClientBuilder> LazyRemote<'b, B> {
    pub fn new(builder: &'b B) -> Self {
        Self {
            builder,
            client: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    /// The live connection, dialing it if this is the first use.
    pub fn client(&mut self) -> Result<&mut B::Client> {
        match self.client {
            Some(ref mut client) => Ok(client),
            None => {
                tracing::debug!("opening remote connection");
                let client = self.builder.connect()?;
                Ok(self.client.insert(client))
            }
        }
    }

    /// Drop the connection. A later [`Self::client`] call dials again.
    pub fn close(&mut self) {
        if self.client.take().is_some() {
            tracing::debug!("remote connection closed");
        }
    }
}
