//! Parsed log line records.
//!
//! A [`LogLine`] is produced by a line source and never mutated by the
//! checker. The lifecycle meaning of a line is decided once, up front, and
//! carried as a [`LineEvent`].

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::level::LogLevel;

/// Descriptor id used as the implicit parent of top level objects.
pub const ROOT_DESCRIPTOR: &str = "root";

/// Opcode of the SWIM failure detector RPCs.
pub const SWIM_OPCODE: &str = "0xfe000000";

/// Opaque allocation address as printed in the log.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pointer(String);

impl Pointer {
    const NIL: &'static str = "(nil)";

    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// True for the null pointer as printed by glibc.
    #[must_use]
    pub fn is_nil(&self) -> bool {
        self.0 == Self::NIL
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for Pointer {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Pointer {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// What a line means for descriptor, RPC and memory tracking.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LineEvent {
    /// Registration of the line's descriptor under `parent`.
    New { parent: String },
    /// The line's descriptor is a link to `parent`.
    Link { parent: String },
    /// Deregistration of the line's descriptor.
    Dereg,
    NewRpc,
    DeregRpc,
    /// The line's RPC was queued for sending.
    RpcSubmitted,
    /// The line's RPC was handed to the transport.
    RpcSent,
    /// The line's RPC completed; `result` is the error name, e.g.
    /// `DER_SUCCESS` or `DER_TIMEDOUT`.
    RpcCompleted { result: String },
    Calloc { pointer: Pointer, size: i64 },
    Free {
        pointer: Pointer,
        /// Variable name the free was logged with.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        variable: Option<String>,
    },
    Realloc {
        new_pointer: Pointer,
        old_pointer: Pointer,
        new_size: i64,
        /// Size the caller reported for the old buffer, 0 if not logged.
        #[serde(default)]
        old_size: i64,
    },
    /// A dfuse read of the inclusive byte range `start..=end` requested by
    /// client process `client_pid`.
    DfuseRead { start: u64, end: u64, client_pid: u32 },
    #[default]
    Other,
}

impl LineEvent {
    #[must_use]
    pub fn new_desc(parent: impl Into<String>) -> Self {
        Self::New {
            parent: parent.into(),
        }
    }

    #[must_use]
    pub fn link(parent: impl Into<String>) -> Self {
        Self::Link {
            parent: parent.into(),
        }
    }

    #[must_use]
    pub fn calloc(pointer: impl Into<Pointer>, size: i64) -> Self {
        Self::Calloc {
            pointer: pointer.into(),
            size,
        }
    }

    #[must_use]
    pub fn free(pointer: impl Into<Pointer>) -> Self {
        Self::Free {
            pointer: pointer.into(),
            variable: None,
        }
    }

    #[must_use]
    pub fn free_var(pointer: impl Into<Pointer>, variable: impl Into<String>) -> Self {
        Self::Free {
            pointer: pointer.into(),
            variable: Some(variable.into()),
        }
    }

    #[must_use]
    pub fn realloc(
        old_pointer: impl Into<Pointer>,
        new_pointer: impl Into<Pointer>,
        new_size: i64,
    ) -> Self {
        Self::Realloc {
            new_pointer: new_pointer.into(),
            old_pointer: old_pointer.into(),
            new_size,
            old_size: 0,
        }
    }
}

/// Fault injection marker attached by the line source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultMark {
    /// The fault injection framework reporting an injection site.
    Site,
    /// An allocation failed because a fault was injected.
    AllocFail,
}

/// RPC tag carried by lines logged against an RPC handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcInfo {
    pub opcode: String,
}

/// One parsed log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub filename: String,
    pub lineno: u32,
    pub pid: u32,
    pub level: LogLevel,
    /// Logging subsystem tag, e.g. `hg` or `rpc`.
    #[serde(default)]
    pub mask: String,
    #[serde(default)]
    pub function: String,
    #[serde(default)]
    pub message: String,
    /// Present on trace lines only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc: Option<RpcInfo>,
    #[serde(default)]
    pub event: LineEvent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<FaultMark>,
    /// Milliseconds since the epoch, when the source knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_ms: Option<u64>,
}

impl LogLine {
    #[must_use]
    pub fn new(filename: impl Into<String>, lineno: u32, pid: u32, level: LogLevel) -> Self {
        Self {
            filename: filename.into(),
            lineno,
            pid,
            level,
            mask: String::new(),
            function: String::new(),
            message: String::new(),
            descriptor: None,
            rpc: None,
            event: LineEvent::Other,
            fault: None,
            time_ms: None,
        }
    }

    #[must_use]
    pub fn with_mask(mut self, mask: impl Into<String>) -> Self {
        self.mask = mask.into();
        self
    }

    #[must_use]
    pub fn with_function(mut self, function: impl Into<String>) -> Self {
        self.function = function.into();
        self
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Mark the line as a trace line for `descriptor`.
    #[must_use]
    pub fn traced(mut self, descriptor: impl Into<String>) -> Self {
        self.descriptor = Some(descriptor.into());
        self
    }

    #[must_use]
    pub fn with_rpc(mut self, opcode: impl Into<String>) -> Self {
        self.rpc = Some(RpcInfo {
            opcode: opcode.into(),
        });
        self
    }

    #[must_use]
    pub fn with_event(mut self, event: LineEvent) -> Self {
        self.event = event;
        self
    }

    #[must_use]
    pub fn with_fault(mut self, fault: FaultMark) -> Self {
        self.fault = Some(fault);
        self
    }

    #[must_use]
    pub fn at_time_ms(mut self, time_ms: u64) -> Self {
        self.time_ms = Some(time_ms);
        self
    }

    #[must_use]
    pub fn is_swim_rpc(&self) -> bool {
        self.rpc.as_ref().is_some_and(|rpc| rpc.opcode == SWIM_OPCODE)
    }

    /// Size recorded by an allocating line, or -1 when the line allocates
    /// nothing.
    #[must_use]
    pub fn allocation_size(&self) -> i64 {
        match self.event {
            LineEvent::Calloc { size, .. } => size,
            LineEvent::Realloc { new_size, .. } => new_size,
            _ => -1,
        }
    }

    /// `file:line` of the logging statement.
    #[must_use]
    pub fn location(&self) -> String {
        format!("{}:{}", self.filename, self.lineno)
    }

    /// The message with pointer values masked so that diagnostics from
    /// different runs compare equal.
    #[must_use]
    pub fn anon_message(&self) -> String {
        self.message
            .split_whitespace()
            .map(anonymize_token)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn anonymize_token(token: &str) -> String {
    let Some(start) = token.find("0x") else {
        return token.to_string();
    };
    let (lead, rest) = token.split_at(start);
    if lead.chars().any(char::is_alphanumeric) {
        return token.to_string();
    }
    let hex = &rest[2..];
    let digits = hex.chars().take_while(char::is_ascii_hexdigit).count();
    if digits > 3 {
        format!("{lead}0x...{}", &hex[digits..])
    } else {
        token.to_string()
    }
}
