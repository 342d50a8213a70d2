use serde::{Deserialize, Serialize};

use recurra_core::{Currency, CustomerId, Entity};

/// Customer status. Only the missing-customer recovery path deactivates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CustomerStatus {
    Active,
    Inactive,
}

/// A billed customer and the currency their account is held in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub currency: Currency,
    pub status: CustomerStatus,
}

impl Customer {
    pub fn new(id: CustomerId, currency: Currency, status: CustomerStatus) -> Self {
        Self {
            id,
            currency,
            status,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == CustomerStatus::Active
    }

    pub fn deactivated(&self) -> Self {
        Self {
            status: CustomerStatus::Inactive,
            ..self.clone()
        }
    }
}

impl Entity for Customer {
    type Id = CustomerId;

    fn id(&self) -> CustomerId {
        self.id
    }
}
