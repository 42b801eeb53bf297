//! Per-statement parameter slots.
//!
//! A `ParameterBindingStore` owns one slot per `?` placeholder. Client-side
//! statements store pre-escaped literal bytes; server-side statements store
//! typed values for the binary protocol; both may hold streamed long-data
//! sources. Slots are written by the `set_*` calls, validated by
//! `check_all_set`, and read (never mutated) during packet assembly.
//!
//! `snapshot` produces the deep-copied, independently-owned parameter set
//! that `add_batch` queues: later `set_*`/`clear` calls on the live store
//! do not affect queued snapshots. Stream sources cannot be copied; a
//! snapshot takes ownership and the live slot reverts to unset.

use std::fmt;
use std::io::Read;

use stratum_core::error::{StatementError, StatementErrorKind};
use stratum_core::{Error, Result, Value};

use crate::types::FieldType;

/// One bound parameter.
pub enum BindValue {
    /// No value bound since creation or the last clear
    Unset,
    /// SQL NULL with its declared type
    Null {
        /// Declared type for the binary type vector
        field_type: FieldType,
    },
    /// Pre-escaped literal bytes for text-protocol inlining
    Text(Vec<u8>),
    /// Typed value for binary-protocol encoding
    Binary {
        /// The bound value
        value: Value,
        /// Declared type for the binary type vector
        field_type: FieldType,
    },
    /// Streamed long-data source, sent via COM_STMT_SEND_LONG_DATA or
    /// inlined as a hex literal on the text path
    Stream {
        /// The data source; single-use
        reader: Box<dyn Read + Send>,
        /// Declared length in bytes, -1 when unknown
        length: i64,
    },
    /// A stream slot whose chunks have been shipped for the pending
    /// execute; contributes a long-data marker to the type vector
    LongDataSent,
}

impl BindValue {
    /// Whether a value has been bound.
    pub fn is_set(&self) -> bool {
        !matches!(self, BindValue::Unset)
    }

    /// Whether this is a streamed long-data slot.
    pub fn is_stream(&self) -> bool {
        matches!(self, BindValue::Stream { .. })
    }

    /// The declared binary-protocol type, when one applies.
    pub fn declared_type(&self) -> Option<FieldType> {
        match self {
            BindValue::Null { field_type } | BindValue::Binary { field_type, .. } => {
                Some(*field_type)
            }
            BindValue::Stream { .. } | BindValue::LongDataSent => Some(FieldType::Blob),
            _ => None,
        }
    }
}

impl fmt::Debug for BindValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindValue::Unset => write!(f, "Unset"),
            BindValue::Null { field_type } => write!(f, "Null({field_type:?})"),
            BindValue::Text(bytes) => write!(f, "Text({} bytes)", bytes.len()),
            BindValue::Binary { value, field_type } => {
                write!(f, "Binary({field_type:?}, {})", value.type_name())
            }
            BindValue::Stream { length, .. } => write!(f, "Stream(length {length})"),
            BindValue::LongDataSent => write!(f, "LongDataSent"),
        }
    }
}

struct Slot {
    value: BindValue,
    /// Last type sent to the server for this slot
    declared_type: Option<FieldType>,
    /// Execution counter at the time of the last long-data bind
    bound_at_execution: u64,
    was_long_data: bool,
}

impl Slot {
    fn new() -> Self {
        Self {
            value: BindValue::Unset,
            declared_type: None,
            bound_at_execution: 0,
            was_long_data: false,
        }
    }
}

/// A deep-copied snapshot of every slot, queued by `add_batch`.
///
/// Owned exclusively by the batch queue; independent of subsequent
/// mutations of the live store.
pub struct BatchedParameterSet {
    values: Vec<BindValue>,
}

impl BatchedParameterSet {
    /// The snapshot's parameter values, in placeholder order.
    pub fn values(&self) -> &[BindValue] {
        &self.values
    }

    /// Mutable access, used when packet assembly consumes stream slots.
    pub fn values_mut(&mut self) -> &mut [BindValue] {
        &mut self.values
    }

    /// Number of parameters in the snapshot.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the snapshot is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for BatchedParameterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchedParameterSet")
            .field("values", &self.values)
            .finish()
    }
}

/// The per-statement array of parameter slots.
pub struct ParameterBindingStore {
    slots: Vec<Slot>,
    /// Lowest valid external (1-based) index; 2 when index 1 is a callable
    /// return-value marker
    first_settable: usize,
    /// Incremented once per execution; long-data interleave detection
    /// compares bind-time counters against it
    execution_count: u64,
    /// The next COM_STMT_EXECUTE must retransmit the type vector
    send_types_to_server: bool,
    /// A stream was rebound across executions; the server-side statement
    /// must be reset before the next execute
    long_parameter_switch: bool,
}

impl ParameterBindingStore {
    /// Create a store with one slot per placeholder.
    pub fn new(parameter_count: usize) -> Self {
        Self {
            slots: (0..parameter_count).map(|_| Slot::new()).collect(),
            first_settable: 1,
            execution_count: 0,
            // Types always accompany the first execution
            send_types_to_server: true,
            long_parameter_switch: false,
        }
    }

    /// Number of bindable parameters.
    pub fn parameter_count(&self) -> usize {
        self.slots.len()
    }

    /// Mark index 1 as a callable return-value marker: external indexes
    /// shift up by one and index 1 becomes invalid.
    pub fn set_return_value_marker(&mut self) {
        self.first_settable = 2;
    }

    /// Validate a 1-based external index and map it to a slot.
    fn slot_index(&self, index: usize) -> Result<usize> {
        if index < self.first_settable || index - self.first_settable >= self.slots.len() {
            return Err(Error::Statement(StatementError {
                kind: StatementErrorKind::ParameterIndexOutOfRange,
                message: format!(
                    "parameter index {index} out of range {}..={}",
                    self.first_settable,
                    self.first_settable + self.slots.len() - 1
                ),
            }));
        }
        Ok(index - self.first_settable)
    }

    /// Bind pre-escaped literal bytes (client-side path).
    pub fn set_text(&mut self, index: usize, literal: Vec<u8>) -> Result<()> {
        let slot = self.slot_index(index)?;
        self.slots[slot].value = BindValue::Text(literal);
        Ok(())
    }

    /// Bind a typed value (server-side binary path).
    ///
    /// When the declared type differs from the type last sent for this
    /// slot, the type vector is retransmitted on the next execute.
    pub fn set_binary(&mut self, index: usize, value: Value, field_type: FieldType) -> Result<()> {
        let slot = self.slot_index(index)?;
        if self.slots[slot].declared_type != Some(field_type) {
            self.send_types_to_server = true;
            self.slots[slot].declared_type = Some(field_type);
        }
        self.slots[slot].value = BindValue::Binary { value, field_type };
        Ok(())
    }

    /// Bind SQL NULL.
    pub fn set_null(&mut self, index: usize, field_type: FieldType) -> Result<()> {
        let slot = self.slot_index(index)?;
        if self.slots[slot].declared_type != Some(field_type) {
            self.send_types_to_server = true;
            self.slots[slot].declared_type = Some(field_type);
        }
        self.slots[slot].value = BindValue::Null { field_type };
        Ok(())
    }

    /// Bind a streamed long-data source. `length` of -1 means unknown.
    pub fn set_stream(
        &mut self,
        index: usize,
        reader: Box<dyn Read + Send>,
        length: i64,
    ) -> Result<()> {
        let slot = self.slot_index(index)?;
        // Rebinding a stream after an intervening execution means the
        // server may still hold the previous chunks; force a reset
        if self.slots[slot].was_long_data
            && self.slots[slot].bound_at_execution < self.execution_count
        {
            self.long_parameter_switch = true;
        }
        self.slots[slot].was_long_data = true;
        self.slots[slot].bound_at_execution = self.execution_count;
        if self.slots[slot].declared_type != Some(FieldType::Blob) {
            self.send_types_to_server = true;
            self.slots[slot].declared_type = Some(FieldType::Blob);
        }
        self.slots[slot].value = BindValue::Stream { reader, length };
        Ok(())
    }

    /// Reset every slot to unset. Declared types survive: the server's
    /// cached type vector is unaffected by clearing values.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            slot.value = BindValue::Unset;
        }
    }

    /// Verify every slot is bound, naming the first unset 1-based index.
    ///
    /// Must be called before packet assembly; fails fast with no I/O.
    pub fn check_all_set(&self) -> Result<()> {
        for (i, slot) in self.slots.iter().enumerate() {
            if !slot.value.is_set() {
                return Err(Error::Statement(StatementError {
                    kind: StatementErrorKind::ParameterNotSet,
                    message: format!("parameter {} is not set", i + self.first_settable),
                }));
            }
        }
        Ok(())
    }

    /// Deep-copy all slots into an independently-owned snapshot.
    ///
    /// Stream slots are moved, not copied: the snapshot takes the reader
    /// and the live slot reverts to unset (streams are single-use).
    pub fn snapshot(&mut self) -> Result<BatchedParameterSet> {
        self.check_all_set()?;
        let values = self
            .slots
            .iter_mut()
            .map(|slot| match &slot.value {
                BindValue::Unset => BindValue::Unset,
                BindValue::Null { field_type } => BindValue::Null {
                    field_type: *field_type,
                },
                BindValue::Text(bytes) => BindValue::Text(bytes.clone()),
                BindValue::Binary { value, field_type } => BindValue::Binary {
                    value: value.clone(),
                    field_type: *field_type,
                },
                BindValue::LongDataSent => BindValue::LongDataSent,
                BindValue::Stream { .. } => std::mem::replace(&mut slot.value, BindValue::Unset),
            })
            .collect();
        Ok(BatchedParameterSet { values })
    }

    /// Record that an execution happened.
    pub fn note_execution(&mut self) {
        self.execution_count += 1;
    }

    /// Whether the next execute must carry the type vector; cleared by
    /// [`Self::mark_types_sent`].
    pub fn send_types_to_server(&self) -> bool {
        self.send_types_to_server
    }

    /// The type vector reached the server; stop resending it.
    pub fn mark_types_sent(&mut self) {
        self.send_types_to_server = false;
    }

    /// Force the next execute to resend the type vector (a re-prepared
    /// statement has no server-side type cache).
    pub fn require_type_resend(&mut self) {
        self.send_types_to_server = true;
    }

    /// Take the long-parameter-switch flag, clearing it. A true return
    /// obliges the caller to reset the server-side statement before the
    /// next execute.
    pub fn take_long_parameter_switch(&mut self) -> bool {
        std::mem::take(&mut self.long_parameter_switch)
    }

    /// Immutable slot access for packet assembly.
    pub fn values(&self) -> impl Iterator<Item = &BindValue> {
        self.slots.iter().map(|slot| &slot.value)
    }

    /// Mutable slot access, used when assembly consumes stream slots.
    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut BindValue> {
        self.slots.iter_mut().map(|slot| &mut slot.value)
    }
}

impl fmt::Debug for ParameterBindingStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParameterBindingStore")
            .field("parameter_count", &self.slots.len())
            .field("execution_count", &self.execution_count)
            .field("send_types_to_server", &self.send_types_to_server)
            .field("long_parameter_switch", &self.long_parameter_switch)
            .finish()
    }
}
