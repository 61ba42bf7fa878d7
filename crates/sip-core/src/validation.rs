//! # Validation Module
//!
//! Input validation for everything that is about to leave the device.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Application                                                   │
//! │  └── Builds the payload from a user action                              │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE                                                   │
//! │  ├── Device identity / record type / cache key shape                    │
//! │  └── Payload size and key rules                                         │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Remote store                                                  │
//! │  └── Rejects unknown record types, oversized records                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use sip_core::validation::{validate_device_identity, validate_record_type};
//!
//! validate_device_identity("Apple Watch").unwrap();
//! validate_record_type("SipEvent").unwrap();
//! ```

use crate::error::ValidationError;
use crate::types::Payload;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Longest accepted device identity.
pub const MAX_DEVICE_IDENTITY_LEN: usize = 128;

/// Longest accepted record type / subscription id.
pub const MAX_RECORD_TYPE_LEN: usize = 64;

/// Longest accepted payload or cache key.
pub const MAX_KEY_LEN: usize = 64;

/// Maximum number of fields in one payload.
pub const MAX_PAYLOAD_FIELDS: usize = 32;

/// Maximum approximate payload size in bytes.
pub const MAX_PAYLOAD_BYTES: usize = 64 * 1024;

// =============================================================================
// String Validators
// =============================================================================

/// Validates a device identity.
///
/// ## Rules
/// - Must not be empty after trimming
/// - At most 128 characters
/// - No control characters
pub fn validate_device_identity(identity: &str) -> ValidationResult<()> {
    let identity = identity.trim();

    if identity.is_empty() {
        return Err(ValidationError::Required {
            field: "device identity".to_string(),
        });
    }

    if identity.chars().count() > MAX_DEVICE_IDENTITY_LEN {
        return Err(ValidationError::TooLong {
            field: "device identity".to_string(),
            max: MAX_DEVICE_IDENTITY_LEN,
        });
    }

    if identity.chars().any(char::is_control) {
        return Err(ValidationError::InvalidFormat {
            field: "device identity".to_string(),
            reason: "must not contain control characters".to_string(),
        });
    }

    Ok(())
}

/// Validates a remote record type or subscription id.
///
/// ## Rules
/// - 1 to 64 characters
/// - ASCII letter first, then letters, digits or underscores
///
/// ## Example
/// ```rust
/// use sip_core::validation::validate_record_type;
///
/// assert!(validate_record_type("SipEvent").is_ok());
/// assert!(validate_record_type("").is_err());
/// assert!(validate_record_type("9lives").is_err());
/// ```
pub fn validate_record_type(record_type: &str) -> ValidationResult<()> {
    if record_type.is_empty() {
        return Err(ValidationError::Required {
            field: "record type".to_string(),
        });
    }

    if record_type.len() > MAX_RECORD_TYPE_LEN {
        return Err(ValidationError::TooLong {
            field: "record type".to_string(),
            max: MAX_RECORD_TYPE_LEN,
        });
    }

    let mut chars = record_type.chars();
    let starts_with_letter = chars.next().map_or(false, |c| c.is_ascii_alphabetic());
    if !starts_with_letter || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ValidationError::InvalidFormat {
            field: "record type".to_string(),
            reason: "must start with a letter and contain only letters, digits, underscores"
                .to_string(),
        });
    }

    Ok(())
}

/// Validates a payload or local cache key.
pub fn validate_key(field: &str, key: &str) -> ValidationResult<()> {
    if key.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if key.len() > MAX_KEY_LEN {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_KEY_LEN,
        });
    }

    Ok(())
}

// =============================================================================
// Payload Validators
// =============================================================================

/// Validates an event payload before it is pushed or relayed.
///
/// ## Rules
/// - At least one field
/// - At most 32 fields, roughly 64 KiB in total
/// - Every key passes [`validate_key`]
pub fn validate_payload(payload: &Payload) -> ValidationResult<()> {
    if payload.is_empty() {
        return Err(ValidationError::Required {
            field: "payload".to_string(),
        });
    }

    if payload.len() > MAX_PAYLOAD_FIELDS {
        return Err(ValidationError::TooLarge {
            field: "payload fields".to_string(),
            max: MAX_PAYLOAD_FIELDS,
        });
    }

    let mut total = 0usize;
    for (key, value) in payload {
        validate_key("payload key", key)?;
        total += key.len() + value.approx_size();
    }

    if total > MAX_PAYLOAD_BYTES {
        return Err(ValidationError::TooLarge {
            field: "payload bytes".to_string(),
            max: MAX_PAYLOAD_BYTES,
        });
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{event_payload, FieldValue};
    use chrono::Utc;

    #[test]
    fn test_validate_device_identity() {
        assert!(validate_device_identity("iPhone").is_ok());
        assert!(validate_device_identity("").is_err());
        assert!(validate_device_identity("   ").is_err());
        assert!(validate_device_identity(&"x".repeat(129)).is_err());
        assert!(matches!(
            validate_device_identity("Watch\n2"),
            Err(ValidationError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn test_validate_record_type() {
        assert!(validate_record_type("SipEvent").is_ok());
        assert!(validate_record_type("sip_event_2").is_ok());
        assert!(validate_record_type("Sip Event").is_err());
        assert!(validate_record_type(&"A".repeat(65)).is_err());
    }

    #[test]
    fn test_validate_payload() {
        assert!(validate_payload(&event_payload(Utc::now())).is_ok());
        assert!(matches!(
            validate_payload(&Payload::new()),
            Err(ValidationError::Required { .. })
        ));

        let mut wide = Payload::new();
        for i in 0..=MAX_PAYLOAD_FIELDS {
            wide.insert(format!("k{}", i), FieldValue::Integer(i as i64));
        }
        assert!(matches!(
            validate_payload(&wide),
            Err(ValidationError::TooLarge { .. })
        ));

        let mut heavy = Payload::new();
        heavy.insert("blob".to_string(), FieldValue::Bytes(vec![0; MAX_PAYLOAD_BYTES]));
        assert!(validate_payload(&heavy).is_err());

        let mut blank_key = Payload::new();
        blank_key.insert(" ".to_string(), FieldValue::Bool(true));
        assert!(validate_payload(&blank_key).is_err());
    }
}
