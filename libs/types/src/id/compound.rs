//! Compound Identifier Codec
//!
//! A compound identifier is a fixed array of optional 128-bit components, one
//! slot per [`Field`]. Field declaration order is significant: it is the
//! canonical order of the string form and the ordinal written in the binary
//! form.
//!
//! ## String Form
//!
//! ```text
//! V1::I<uuid>:A<uuid>:R<uuid>:T<uuid>
//! ```
//!
//! Components are always emitted in field order, whatever order the caller
//! asks for them in.
//!
//! ## Binary Form
//!
//! ```text
//! ┌────────┬─────────┬──────────────────┬─────────┬──────────────────┬─────
//! │ 0x01   │ ordinal │ 16 bytes (BE)    │ ordinal │ 16 bytes (BE)    │ ...
//! └────────┴─────────┴──────────────────┴─────────┴──────────────────┴─────
//! ```
//!
//! Components are emitted in the order requested by the caller.

use std::hash::{Hash, Hasher};

use bytes::{Buf, BufMut};
use uuid::Uuid;

use super::error::IdError;

/// Literal that starts every string-form identifier
pub const PREFIX: &str = "V1::";

/// Separator between string-form components
pub const SEPARATOR: char = ':';

/// First byte of every binary-form identifier
pub const PREFIX_BYTE: u8 = 1;

/// Width of one component value in the binary form
pub const VALUE_BYTES: usize = 16;

const COMPONENT_BYTES: usize = 1 + VALUE_BYTES;
const UUID_TEXT_LEN: usize = 36;

/// One dimension of a compound identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Field {
    Instance = 0,
    Application = 1,
    Resource = 2,
    Task = 3,
}

impl Field {
    pub const COUNT: usize = 4;

    /// Every field in declaration order
    pub const ALL: [Field; Field::COUNT] = [
        Field::Instance,
        Field::Application,
        Field::Resource,
        Field::Task,
    ];

    /// Single-letter code used in the string form
    pub const fn code(self) -> char {
        match self {
            Field::Instance => 'I',
            Field::Application => 'A',
            Field::Resource => 'R',
            Field::Task => 'T',
        }
    }

    /// Ordinal used in the binary form and as the slot index
    pub const fn ordinal(self) -> u8 {
        self as u8
    }

    pub fn from_ordinal(ordinal: u8) -> Option<Field> {
        Self::ALL.get(ordinal as usize).copied()
    }

    pub fn from_code(code: char) -> Option<Field> {
        Self::ALL.iter().copied().find(|field| field.code() == code)
    }
}

const fn codes_are_distinct() -> bool {
    let mut i = 0;
    while i < Field::COUNT {
        let mut j = i + 1;
        while j < Field::COUNT {
            if Field::ALL[i].code() == Field::ALL[j].code() {
                return false;
            }
            j += 1;
        }
        i += 1;
    }
    true
}

const _: () = assert!(codes_are_distinct(), "field codes must be pairwise distinct");

/// Length of the binary form carrying `fields` components
pub const fn encoded_len(fields: usize) -> usize {
    1 + fields * COMPONENT_BYTES
}

/// Sorted, fixed-slot identifier shared by every typed id
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CompoundId {
    values: [Option<Uuid>; Field::COUNT],
}

impl CompoundId {
    pub fn get(&self, field: Field) -> Option<Uuid> {
        self.values[field.ordinal() as usize]
    }

    /// Value of a field that must be present
    pub fn require(&self, field: Field) -> Result<Uuid, IdError> {
        self.get(field).ok_or(IdError::MissingField { field })
    }

    /// Present fields in canonical order
    pub fn fields(&self) -> impl Iterator<Item = Field> + '_ {
        Field::ALL
            .iter()
            .copied()
            .filter(move |field| self.get(*field).is_some())
    }

    /// Parse the canonical string form
    pub fn parse_str(input: &str) -> Result<Self, IdError> {
        let body = input
            .strip_prefix(PREFIX)
            .ok_or_else(|| IdError::malformed(format!("expected prefix {PREFIX:?}")))?;
        if body.is_empty() {
            return Err(IdError::malformed("no components"));
        }

        let mut id = CompoundId::default();
        for component in body.split(SEPARATOR) {
            let (field, value) = parse_component(component)?;
            id.insert(field, value)?;
        }
        Ok(id)
    }

    /// Parse a complete binary form; every byte must belong to a component
    pub fn parse_bytes(input: &[u8]) -> Result<Self, IdError> {
        if input.is_empty() {
            return Err(IdError::malformed("empty input"));
        }
        let payload = input.len() - 1;
        if payload == 0 || payload % COMPONENT_BYTES != 0 {
            return Err(IdError::malformed(format!(
                "{} bytes is not a whole number of components",
                input.len()
            )));
        }
        let mut buf = input;
        Self::read_from(&mut buf, payload / COMPONENT_BYTES)
    }

    /// Read a binary form holding exactly `count` components from `buf`
    pub fn read_from<B: Buf>(buf: &mut B, count: usize) -> Result<Self, IdError> {
        if buf.remaining() < encoded_len(count) {
            return Err(IdError::malformed(format!(
                "truncated: need {} bytes, have {}",
                encoded_len(count),
                buf.remaining()
            )));
        }
        let prefix = buf.get_u8();
        if prefix != PREFIX_BYTE {
            return Err(IdError::malformed(format!("unknown format byte {prefix:#04x}")));
        }

        let mut id = CompoundId::default();
        for _ in 0..count {
            let ordinal = buf.get_u8();
            let field = Field::from_ordinal(ordinal)
                .ok_or_else(|| IdError::malformed(format!("unknown field ordinal {ordinal}")))?;
            id.insert(field, Uuid::from_u128(buf.get_u128()))?;
        }
        Ok(id)
    }

    /// Write the binary form of `fields`, in the order given
    pub fn write_to<B: BufMut>(&self, fields: &[Field], buf: &mut B) -> Result<(), IdError> {
        // validate before touching the buffer
        let values = fields
            .iter()
            .map(|field| self.require(*field).map(|value| (*field, value)))
            .collect::<Result<Vec<_>, _>>()?;

        buf.put_u8(PREFIX_BYTE);
        for (field, value) in values {
            buf.put_u8(field.ordinal());
            buf.put_u128(value.as_u128());
        }
        Ok(())
    }

    /// String form of `fields`, emitted in canonical order
    pub fn encode_str(&self, fields: &[Field]) -> Result<String, IdError> {
        let mut sorted = fields.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        let mut out = String::with_capacity(PREFIX.len() + sorted.len() * (UUID_TEXT_LEN + 2));
        out.push_str(PREFIX);
        for (i, field) in sorted.iter().enumerate() {
            let value = self.require(*field)?;
            if i > 0 {
                out.push(SEPARATOR);
            }
            out.push(field.code());
            out.push_str(value.hyphenated().encode_lower(&mut Uuid::encode_buffer()));
        }
        Ok(out)
    }

    /// Binary form of `fields`, in the order given
    pub fn encode_bytes(&self, fields: &[Field]) -> Result<Vec<u8>, IdError> {
        let mut out = Vec::with_capacity(encoded_len(fields.len()));
        self.write_to(fields, &mut out)?;
        Ok(out)
    }

    /// String form of every present field
    pub fn canonical_string(&self) -> String {
        let mut out = String::from(PREFIX);
        for (i, field) in self.fields().enumerate() {
            if i > 0 {
                out.push(SEPARATOR);
            }
            out.push(field.code());
            if let Some(value) = self.get(field) {
                out.push_str(value.hyphenated().encode_lower(&mut Uuid::encode_buffer()));
            }
        }
        out
    }

    /// Binary form of every present field, in canonical order
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let present: Vec<Field> = self.fields().collect();
        let mut out = Vec::with_capacity(encoded_len(present.len()));
        out.put_u8(PREFIX_BYTE);
        for field in present {
            if let Some(value) = self.get(field) {
                out.put_u8(field.ordinal());
                out.put_u128(value.as_u128());
            }
        }
        out
    }

    /// Copy holding only those of `fields` that are present here
    pub fn project(&self, fields: &[Field]) -> CompoundId {
        let mut projected = CompoundId::default();
        for field in fields {
            projected.values[field.ordinal() as usize] = self.get(*field);
        }
        projected
    }

    /// Check that exactly `fields` are present
    pub fn restrict_to_exactly(self, fields: &[Field]) -> Result<Self, IdError> {
        for field in Field::ALL {
            match (fields.contains(&field), self.get(field).is_some()) {
                (true, false) => return Err(IdError::MissingField { field }),
                (false, true) => return Err(IdError::UnexpectedField { field }),
                _ => {}
            }
        }
        Ok(self)
    }

    /// Equality restricted to `fields`
    pub fn eq_on(&self, other: &CompoundId, fields: &[Field]) -> bool {
        fields.iter().all(|field| self.get(*field) == other.get(*field))
    }

    /// Hash restricted to `fields`
    pub fn hash_on<H: Hasher>(&self, fields: &[Field], state: &mut H) {
        for field in fields {
            self.get(*field).hash(state);
        }
    }

    fn insert(&mut self, field: Field, value: Uuid) -> Result<(), IdError> {
        let slot = &mut self.values[field.ordinal() as usize];
        if slot.is_some() {
            return Err(IdError::malformed(format!("duplicate field {field:?}")));
        }
        *slot = Some(value);
        Ok(())
    }
}

fn parse_component(component: &str) -> Result<(Field, Uuid), IdError> {
    let mut chars = component.chars();
    let code = chars
        .next()
        .ok_or_else(|| IdError::malformed("empty component"))?;
    let field = Field::from_code(code)
        .ok_or_else(|| IdError::malformed(format!("unknown field code {code:?}")))?;

    let text = chars.as_str();
    if text.len() != UUID_TEXT_LEN {
        return Err(IdError::malformed(format!(
            "component {component:?} does not hold a canonical uuid"
        )));
    }
    let value = Uuid::parse_str(text)
        .map_err(|e| IdError::malformed(format!("component {component:?}: {e}")))?;

    // only the lowercase hyphenated rendering is canonical
    if value.hyphenated().to_string() != text {
        return Err(IdError::malformed(format!(
            "component {component:?} is not in canonical form"
        )));
    }
    Ok((field, value))
}

/// Incremental construction of a [`CompoundId`]
#[derive(Debug, Clone, Default)]
pub struct Builder {
    id: CompoundId,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a copy of an existing identifier
    pub fn from_id(id: &CompoundId) -> Self {
        Self { id: *id }
    }

    /// Set or override one field
    pub fn with(mut self, field: Field, value: Uuid) -> Self {
        self.id.values[field.ordinal() as usize] = Some(value);
        self
    }

    pub fn with_random(self, field: Field) -> Self {
        self.with(field, Uuid::new_v4())
    }

    pub fn without(mut self, fields: &[Field]) -> Self {
        for field in fields {
            self.id.values[field.ordinal() as usize] = None;
        }
        self
    }

    pub fn build(self) -> CompoundId {
        self.id
    }

    /// Build, failing unless exactly `fields` are present
    pub fn restrict_to_exactly(self, fields: &[Field]) -> Result<CompoundId, IdError> {
        self.id.restrict_to_exactly(fields)
    }
}
