use crate::{
    actor::StoreContext,
    reconcile::{self, Desired, DesiredEntry},
    table::BreakpointTable,
    BackendLocation, BreakpointError, HitCondition,
};

/// Parses a protocol memory reference (`0x`-prefixed hex or decimal) and
/// applies the optional byte offset.
pub fn parse_instruction_reference(
    reference: &str,
    offset: Option<i64>,
) -> Result<u64, BreakpointError> {
    let invalid = || BreakpointError::InvalidInstructionReference(reference.to_string());
    let trimmed = reference.trim();
    let base = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => trimmed.parse::<u64>(),
    }
    .map_err(|_| invalid())?;

    match offset.unwrap_or(0) {
        offset if offset >= 0 => base.checked_add(offset as u64),
        offset => base.checked_sub(offset.unsigned_abs()),
    }
    .ok_or_else(invalid)
}

pub(crate) async fn reconcile_instructions(
    requests: &[dap::InstructionBreakpoint],
    table: &mut BreakpointTable,
    cx: &StoreContext,
) -> Vec<dap::Breakpoint> {
    let mut entries = Vec::with_capacity(requests.len());
    for request in requests {
        entries.push(resolve_instruction_entry(request, cx).await);
    }
    reconcile::reconcile(entries, table, cx).await
}

async fn resolve_instruction_entry(
    request: &dap::InstructionBreakpoint,
    cx: &StoreContext,
) -> DesiredEntry {
    let rejected = |error: BreakpointError, kept: Option<BackendLocation>| {
        DesiredEntry::Rejected {
            result: dap::Breakpoint {
                verified: false,
                message: Some(error.to_string()),
                instruction_reference: Some(request.instruction_reference.clone()),
                offset: request.offset,
                ..Default::default()
            },
            kept,
        }
    };

    let address =
        match parse_instruction_reference(&request.instruction_reference, request.offset) {
            Ok(address) => address,
            Err(error) => return rejected(error, None),
        };
    let location = match cx.resolver.resolve_instruction(address).await {
        Ok(address) => BackendLocation::Address(address),
        Err(error) => return rejected(error, None),
    };
    let hit_condition = match request
        .hit_condition
        .as_deref()
        .map(str::parse::<HitCondition>)
        .transpose()
    {
        Ok(hit_condition) => hit_condition,
        Err(error) => return rejected(error, Some(location)),
    };

    DesiredEntry::Resolved(Desired {
        location,
        requested_line: None,
        requested_column: None,
        condition: request.condition.clone(),
        hit_condition,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_and_decimal() {
        assert_eq!(parse_instruction_reference("0x401000", None), Ok(0x401000));
        assert_eq!(parse_instruction_reference("0X1F", None), Ok(0x1f));
        assert_eq!(parse_instruction_reference("4096", None), Ok(4096));
    }

    #[test]
    fn test_parse_applies_offset() {
        assert_eq!(parse_instruction_reference("0x1000", Some(8)), Ok(0x1008));
        assert_eq!(parse_instruction_reference("0x1000", Some(-16)), Ok(0xff0));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(
            parse_instruction_reference("main+4", None),
            Err(BreakpointError::InvalidInstructionReference("main+4".into()))
        );
        assert!(parse_instruction_reference("0x10", Some(-32)).is_err());
        assert!(parse_instruction_reference("0x", None).is_err());
    }
}
