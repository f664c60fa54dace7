// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Message shapes crossing the queue boundary.

/// An outbound message: body plus the headers and properties the RPC
/// convention uses. `method` and `rpc_id` mirror the body's envelope so
/// brokers and tooling can route without parsing JSON.
#[derive(Debug, Clone, Default)]
pub struct Publication {
    pub body: Vec<u8>,
    pub method: Option<String>,
    pub rpc_id: Option<String>,
    pub reply_to: Option<String>,
    pub correlation_id: Option<String>,
}

impl Publication {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn rpc_id(mut self, rpc_id: impl Into<String>) -> Self {
        self.rpc_id = Some(rpc_id.into());
        self
    }

    /// Attach the reply address and correlation id that make this an
    /// RPC-style request.
    pub fn reply_to(mut self, address: impl Into<String>, correlation_id: impl Into<String>) -> Self {
        self.reply_to = Some(address.into());
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

/// One consumed message. The tag is only meaningful to the channel that
/// produced the delivery; ack or nack must go back through it.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub tag: u64,
    pub body: Vec<u8>,
    pub method: Option<String>,
    pub rpc_id: Option<String>,
    pub reply_to: Option<String>,
    pub correlation_id: Option<String>,
    pub redelivered: bool,
}

impl Delivery {
    /// Reply address and correlation id when both are present; replies are
    /// only published for deliveries that carry the full pair.
    pub fn reply_address(&self) -> Option<(&str, &str)> {
        match (&self.reply_to, &self.correlation_id) {
            (Some(reply_to), Some(correlation_id)) => {
                Some((reply_to.as_str(), correlation_id.as_str()))
            }
            _ => None,
        }
    }
}
