//! The lifecycle every boundary resource obeys.
//!
//! A [`Handle`] carries one engine token and is the single place a token
//! becomes invalid locally: [`Handle::close_with`] zeroes it before the
//! boundary call is made, so a failed close still leaves the resource closed
//! and a second close always fails instead of freeing twice.

use sqlbridge_db::{DbResult, Token};
use strum::Display;

use crate::error::{Error, Result};

/// The kinds of resource that live on the far side of the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Resource {
    /// A [`Database`](crate::Database) or [`EmbeddedReplica`](crate::EmbeddedReplica).
    Database,
    /// A [`Connection`](crate::Connection).
    Connection,
    /// A [`Transaction`](crate::Transaction).
    Transaction,
    /// A [`Rows`](crate::Rows) stream.
    Rows,
}

/// Exclusive owner of one engine token. `0` means closed.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Handle {
    token: Token,
    resource: Resource,
}

impl Handle {
    /// Takes ownership of `token`.
    pub(crate) const fn new(token: Token, resource: Resource) -> Result<Self> {
        if token == 0 {
            return Err(Error::InvalidHandle { resource });
        }
        Ok(Self { token, resource })
    }

    /// The live token, or [`Error::UseAfterClose`].
    pub(crate) const fn get(&self) -> Result<Token> {
        if self.token == 0 {
            return Err(Error::UseAfterClose {
                resource: self.resource,
            });
        }
        Ok(self.token)
    }

    pub(crate) const fn is_closed(&self) -> bool {
        self.token == 0
    }

    pub(crate) const fn resource(&self) -> Resource {
        self.resource
    }

    /// Invalidates the handle and hands the token to `close`.
    ///
    /// The handle is zeroed whether or not `close` succeeds.
    pub(crate) fn close_with(&mut self, close: impl FnOnce(Token) -> DbResult<()>) -> Result<()> {
        let token = self.token;
        if token == 0 {
            return Err(Error::DoubleClose {
                resource: self.resource,
            });
        }
        self.token = 0;
        close(token)?;
        Ok(())
    }
}
