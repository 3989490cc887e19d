// Entity Models - the persisted relations of the billing ledger
//
// Every entity has a stable integer identity (SQLite rowid) wrapped in a
// newtype so a PaymentId can never be passed where an InvoiceId is expected.
// Money is fixed-point (rust_decimal), never f64.

pub mod allocation;
pub mod invoice;
pub mod money;
pub mod payment;
pub mod status;

pub use allocation::{Allocation, AllocationLine};
pub use invoice::{Invoice, InvoiceLine, NewInvoice, NewInvoiceLine};
pub use money::{format_amount, parse_amount, round_currency, sum_amounts};
pub use payment::{NewPayment, Payment};
pub use status::StatusCode;

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! entity_id {
    ($name:ident, $label:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            pub const ENTITY: &'static str = $label;

            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(raw: i64) -> Self {
                $name(raw)
            }
        }
    };
}

entity_id!(InvoiceId, "invoice");
entity_id!(PaymentId, "payment");
entity_id!(AllocationId, "allocation");
entity_id!(MemberId, "member");
