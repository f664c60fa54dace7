// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wire types shared by every portico process.
//!
//! Two independent surfaces live here:
//! - `rpc`: the JSON envelopes carried over the message queue
//!   (`{method, params, id}` in, `{result, error, id, elapsed}` out)
//!   and the error codes the bridge emits.
//! - `pipe` + `frame`: the control-socket protocol between the
//!   supervisor and its manager children: length-prefixed frames
//!   carrying JSON `PipeMessage` payloads.

pub mod frame;
pub mod pipe;
pub mod rpc;

pub use frame::{Frame, FrameError, FramedStream, MessageType, read_frame, write_frame};
pub use pipe::{ManagerState, PipeMessage};
pub use rpc::{RpcError, RpcRequest, RpcResponse};
