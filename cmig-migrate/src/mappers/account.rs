use super::tables::normalize_unit;
use super::MapContext;
use crate::identity::CanonicalCustomerId;
use crate::models::ids::account_id_for;
use crate::models::{SourceCaseRecord, TargetAccount};

/// Build the account for a canonical customer from its representative record
///
/// Returns `None` when the canonical id is blank. A missing customer name
/// defaults to the customer number.
pub fn map_account(
    customer: &CanonicalCustomerId,
    representative: &SourceCaseRecord,
    ctx: &MapContext,
) -> Option<TargetAccount> {
    let customer_number = customer.as_str();
    if customer_number.is_empty() {
        return None;
    }

    Some(TargetAccount {
        id: account_id_for(customer_number),
        customer_number: customer_number.to_string(),
        name: representative
            .customer_name
            .clone()
            .unwrap_or_else(|| customer_number.to_string()),
        phone: representative.phone.clone(),
        unit: normalize_unit(representative.unit.as_deref()),
        owner_id: ctx.owner_id.clone(),
        source_customer_id: representative
            .raw_customer_id
            .clone()
            .unwrap_or_else(|| customer_number.to_string()),
        created_at: representative
            .created_at
            .or(representative.updated_at)
            .unwrap_or(ctx.migrated_at),
    })
}
