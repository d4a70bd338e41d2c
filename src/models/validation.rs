use anyhow::{Result, anyhow};

use crate::models::event::Event;

const MAX_EVENT_TYPE_LEN: usize = 100;

pub fn validate_instance_id(instance_id: &str) -> Result<()> {
    if instance_id.trim().is_empty() {
        return Err(anyhow!("Instance id cannot be empty"));
    }

    Ok(())
}

pub fn validate_event_type(event_type: &str) -> Result<()> {
    if event_type.is_empty() {
        return Err(anyhow!("Event type cannot be empty"));
    }

    if event_type.len() > MAX_EVENT_TYPE_LEN {
        return Err(anyhow!(
            "Event type too long (maximum {} characters)",
            MAX_EVENT_TYPE_LEN
        ));
    }

    let valid_chars = event_type
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.');

    if !valid_chars {
        return Err(anyhow!("Event type contains invalid characters"));
    }

    Ok(())
}

pub fn validate_event(event: &Event) -> Result<()> {
    validate_instance_id(&event.instance_id)?;
    validate_event_type(&event.event_type)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_rules() {
        assert!(validate_event_type("deploy").is_ok());
        assert!(validate_event_type("user_test").is_ok());
        assert!(validate_event_type("").is_err());
        assert!(validate_event_type("has space").is_err());
        assert!(validate_event_type(&"x".repeat(101)).is_err());
    }

    #[test]
    fn test_instance_id_must_not_be_blank() {
        assert!(validate_instance_id("org1").is_ok());
        assert!(validate_instance_id("  ").is_err());
    }
}
