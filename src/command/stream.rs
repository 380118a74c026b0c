//! Command stream compilation and decoding

use std::fmt::Write as _;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Result, StoreError};
use crate::schema::{FieldDescriptor, FieldKind, FieldSet, ListElement};
use crate::size::WordSpace;

use super::opcode::*;

/// Most fields one skip command can cover
const MAX_FIELDS_PER_COMMAND: usize = u8::MAX as usize;

/// Compiled, immutable per-schema command sequence
#[derive(Debug, Clone)]
pub struct CommandStream {
    bytes: Bytes,
    field_count: usize,
}

impl CommandStream {
    /// Compile the command stream for an ordered field set
    pub fn compile(fields: &FieldSet, extensible: bool) -> Result<CommandStream> {
        let mut builder = StreamBuilder::default();

        for (index, field) in fields.iter().enumerate() {
            let fixed = field.size_descriptor().fixed_in(WordSpace::Byte);
            let guarded = field.null_flag().is_some() && fixed.is_none();
            // The walker keeps one pending skip flag, not a mask: every guard is
            // immediately followed by the single command of the field it guards
            if guarded {
                builder.flush();
                let index = u16::try_from(index).map_err(|_| StoreError::MalformedCommands {
                    position: builder.buf.len(),
                    detail: format!("field index {index} does not fit a null guard"),
                })?;
                builder.emit(Command::SkipFlowIfNull { field: index });
            }

            match (marker_kind(field), fixed) {
                (Some(kind), _) => {
                    builder.flush();
                    builder.emit(Command::Marker {
                        kind,
                        needs_size: fixed.is_none(),
                    });
                }
                // A guarded field must own its command so a null skips nothing else
                (None, _) if guarded => builder.emit(Command::SkipUnknown { extra: 0 }),
                (None, Some(size)) => builder.skip_fixed(size),
                (None, None) => builder.skip_unknown(),
            }
        }

        builder.flush();
        if extensible {
            builder.emit(Command::SwitchToDynamicFieldList);
        }
        builder.emit(Command::EndFields);

        Ok(CommandStream {
            bytes: builder.buf.freeze(),
            field_count: fields.len(),
        })
    }

    /// Encoded length in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of fields the stream was compiled for
    pub fn field_count(&self) -> usize {
        self.field_count
    }

    /// Decode the stream command by command, with byte positions
    pub fn iter(&self) -> CommandIter<'_> {
        CommandIter {
            bytes: &self.bytes,
            position: 0,
            done: false,
        }
    }

    /// Decode every command
    pub fn commands(&self) -> Result<Vec<Command>> {
        self.iter().map(|r| r.map(|(_, c)| c)).collect()
    }

    /// Human-readable listing
    pub fn disassemble(&self) -> String {
        self.render(None)
    }

    /// Listing annotated with the names of the fields each command covers
    pub fn disassemble_with(&self, fields: &FieldSet) -> String {
        self.render(Some(fields))
    }

    fn render(&self, fields: Option<&FieldSet>) -> String {
        let mut listing = String::new();
        let mut index = 0usize;
        for entry in self.iter() {
            match entry {
                Ok((position, command)) => {
                    let _ = write!(listing, "{position:04x}: {command}");
                    let covered = command.field_count();
                    if let (Some(fields), true) = (fields, covered > 0) {
                        let names: Vec<&str> = (index..index + covered)
                            .filter_map(|i| fields.get(i).map(|f| f.name()))
                            .collect();
                        let _ = write!(listing, "    ; {}", names.join(", "));
                    }
                    index += covered;
                    listing.push('\n');
                }
                Err(e) => {
                    let _ = writeln!(listing, "!! {e}");
                    break;
                }
            }
        }
        listing
    }
}

/// Field kind a marker command announces, if any
fn marker_kind(field: &FieldDescriptor) -> Option<MarkerKind> {
    match field.kind() {
        FieldKind::Reference { .. } => Some(MarkerKind::Reference),
        FieldKind::ChunkPointer => Some(MarkerKind::ChunkPointer),
        FieldKind::Dynamic { .. }
        | FieldKind::List {
            element: ListElement::Dynamic { .. },
            ..
        } => Some(MarkerKind::Dynamic),
        FieldKind::Inline { .. } | FieldKind::List { .. } if field.is_pointer_bearing() => {
            Some(MarkerKind::PotentialReference)
        }
        _ => None,
    }
}

// =============================================================================
// Builder
// =============================================================================

enum PendingSkip {
    Fixed { size: u64, fields: usize },
    Unknown { fields: usize },
}

#[derive(Default)]
struct StreamBuilder {
    buf: BytesMut,
    pending: Option<PendingSkip>,
}

impl StreamBuilder {
    fn skip_fixed(&mut self, size: u64) {
        if let Some(PendingSkip::Fixed { size: total, fields }) = &mut self.pending {
            if *fields < MAX_FIELDS_PER_COMMAND {
                *total += size;
                *fields += 1;
                return;
            }
        }
        self.flush();
        self.pending = Some(PendingSkip::Fixed { size, fields: 1 });
    }

    fn skip_unknown(&mut self) {
        if let Some(PendingSkip::Unknown { fields }) = &mut self.pending {
            if *fields <= MAX_FIELDS_PER_COMMAND {
                *fields += 1;
                return;
            }
        }
        self.flush();
        self.pending = Some(PendingSkip::Unknown { fields: 1 });
    }

    fn flush(&mut self) {
        match self.pending.take() {
            Some(PendingSkip::Fixed { size, fields }) => self.emit(Command::SkipBytes {
                size,
                fields: fields as u8,
            }),
            Some(PendingSkip::Unknown { fields }) => self.emit(Command::SkipUnknown {
                extra: (fields - 1) as u8,
            }),
            None => {}
        }
    }

    fn emit(&mut self, command: Command) {
        match command {
            Command::EndFields => self.buf.put_u8(END_FIELDS),
            Command::SwitchToDynamicFieldList => self.buf.put_u8(SWITCH_TO_DYNAMIC_FIELD_LIST),
            Command::SkipBytes { size, fields } => {
                if let Ok(size) = u8::try_from(size) {
                    self.buf.put_u8(SKIP_BYTES_8);
                    self.buf.put_u8(size);
                } else if let Ok(size) = u32::try_from(size) {
                    self.buf.put_u8(SKIP_BYTES_32);
                    self.buf.put_u32_le(size);
                } else {
                    self.buf.put_u8(SKIP_BYTES_64);
                    self.buf.put_u64_le(size);
                }
                self.buf.put_u8(fields);
            }
            Command::SkipUnknown { extra } => {
                self.buf.put_u8(SKIP_UNKNOWN);
                self.buf.put_u8(extra);
            }
            Command::SkipFlowIfNull { field } => {
                self.buf.put_u8(SKIP_FLOW_IF_NULL);
                self.buf.put_u16_le(field);
            }
            Command::Marker { kind, needs_size } => {
                let flag = if needs_size { NEEDS_SIZE } else { 0 };
                self.buf.put_u8(kind.opcode() | flag);
            }
        }
    }
}

// =============================================================================
// Decoding
// =============================================================================

/// Iterator over `(byte position, command)` pairs; stops after `END_FIELDS`
pub struct CommandIter<'a> {
    bytes: &'a [u8],
    position: usize,
    done: bool,
}

impl CommandIter<'_> {
    fn operand<const N: usize>(&mut self, start: usize) -> Result<[u8; N]> {
        let end = self.position + N;
        let slice = self.bytes.get(self.position..end).ok_or_else(|| StoreError::MalformedCommands {
            position: start,
            detail: format!("truncated operand, {N} bytes expected"),
        })?;
        self.position = end;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn decode(&mut self) -> Result<(usize, Command)> {
        let start = self.position;
        let op = self.bytes[start];
        self.position += 1;

        let command = match op {
            END_FIELDS => Command::EndFields,
            SWITCH_TO_DYNAMIC_FIELD_LIST => Command::SwitchToDynamicFieldList,
            SKIP_BYTES_8 => {
                let [size, fields] = self.operand::<2>(start)?;
                Command::SkipBytes {
                    size: u64::from(size),
                    fields,
                }
            }
            SKIP_BYTES_32 => {
                let size = u32::from_le_bytes(self.operand::<4>(start)?);
                let [fields] = self.operand::<1>(start)?;
                Command::SkipBytes {
                    size: u64::from(size),
                    fields,
                }
            }
            SKIP_BYTES_64 => {
                let size = u64::from_le_bytes(self.operand::<8>(start)?);
                let [fields] = self.operand::<1>(start)?;
                Command::SkipBytes { size, fields }
            }
            SKIP_UNKNOWN => {
                let [extra] = self.operand::<1>(start)?;
                Command::SkipUnknown { extra }
            }
            SKIP_FLOW_IF_NULL => Command::SkipFlowIfNull {
                field: u16::from_le_bytes(self.operand::<2>(start)?),
            },
            other => match MarkerKind::from_opcode(other & !NEEDS_SIZE) {
                Some(kind) => Command::Marker {
                    kind,
                    needs_size: other & NEEDS_SIZE != 0,
                },
                None => {
                    return Err(StoreError::MalformedCommands {
                        position: start,
                        detail: format!("unknown opcode {other:#04x}"),
                    })
                }
            },
        };
        Ok((start, command))
    }
}

impl Iterator for CommandIter<'_> {
    type Item = Result<(usize, Command)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.position >= self.bytes.len() {
            self.done = true;
            return Some(Err(StoreError::MalformedCommands {
                position: self.position,
                detail: "stream ends without END_FIELDS".to_string(),
            }));
        }
        let decoded = self.decode();
        if matches!(decoded, Ok((_, Command::EndFields)) | Err(_)) {
            self.done = true;
        }
        Some(decoded)
    }
}
