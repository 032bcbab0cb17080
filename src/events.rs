// events.rs
use serde::Deserialize;
use serde_json::{Map, Number, Value};
use std::fmt;

/// A Stripe event envelope. Only the parts this service reads are modeled;
/// `data.object` stays dynamically typed.
#[derive(Debug, Clone, Deserialize)]
pub struct Event {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionAction {
    Created,
    Updated,
    Deleted,
}

impl SubscriptionAction {
    pub fn from_event_type(event_type: &str) -> Option<Self> {
        match event_type {
            "customer.subscription.created" => Some(Self::Created),
            "customer.subscription.updated" => Some(Self::Updated),
            "customer.subscription.deleted" => Some(Self::Deleted),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldError {
    #[error("{0} key not found in event.data.object")]
    Missing(&'static str),
    #[error("{field} key in event.data.object is not a {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },
}

impl FieldError {
    pub fn field(&self) -> &'static str {
        match self {
            Self::Missing(field) => *field,
            Self::WrongType { field, .. } => *field,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionChange {
    pub action: SubscriptionAction,
    pub customer: String,
    pub status: String,
    pub quantity: Number,
}

impl SubscriptionChange {
    /// Reads `customer`, `status` and `quantity` from a subscription object,
    /// stopping at the first key that is absent or of the wrong type.
    pub fn extract(
        action: SubscriptionAction,
        object: &Map<String, Value>,
    ) -> Result<Self, FieldError> {
        let customer = string_field(object, "customer")?;
        let status = string_field(object, "status")?;
        let quantity = number_field(object, "quantity")?;

        Ok(Self {
            action,
            customer,
            status,
            quantity,
        })
    }
}

impl fmt::Display for SubscriptionChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The created line has always carried a space before the parenthesis.
        let quantity_label = match self.action {
            SubscriptionAction::Created => "quantity (",
            SubscriptionAction::Updated | SubscriptionAction::Deleted => "quantity(",
        };

        write!(
            f,
            "customer {} subscription {}, {}{}), current status: {}",
            self.customer,
            self.action.as_str(),
            quantity_label,
            self.quantity,
            self.status
        )
    }
}

fn field<'a>(
    object: &'a Map<String, Value>,
    name: &'static str,
) -> Result<&'a Value, FieldError> {
    object.get(name).ok_or(FieldError::Missing(name))
}

fn string_field(object: &Map<String, Value>, name: &'static str) -> Result<String, FieldError> {
    field(object, name)?
        .as_str()
        .map(str::to_owned)
        .ok_or(FieldError::WrongType {
            field: name,
            expected: "string",
        })
}

fn number_field(object: &Map<String, Value>, name: &'static str) -> Result<Number, FieldError> {
    match field(object, name)? {
        Value::Number(n) => Ok(n.clone()),
        _ => Err(FieldError::WrongType {
            field: name,
            expected: "number",
        }),
    }
}

/// What a verified event turned into. `Display` renders the log line.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    Subscription(SubscriptionChange),
    FieldError {
        action: SubscriptionAction,
        error: FieldError,
    },
    Unrecognized(String),
}

impl fmt::Display for Dispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dispatch::Subscription(change) => write!(f, "{}", change),
            Dispatch::FieldError { error, .. } => write!(f, "{}", error),
            Dispatch::Unrecognized(event_type) => {
                write!(f, "Unknown event type received: {}", event_type)
            }
        }
    }
}

pub fn dispatch(event: &Event) -> Dispatch {
    match SubscriptionAction::from_event_type(&event.event_type) {
        Some(action) => match SubscriptionChange::extract(action, &event.data.object) {
            Ok(change) => Dispatch::Subscription(change),
            Err(error) => Dispatch::FieldError { action, error },
        },
        None => Dispatch::Unrecognized(event.event_type.clone()),
    }
}
