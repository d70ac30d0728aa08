use datastore_unit_of_work::{Entity, Key, Value};
use uuid::Uuid;

fn string_property(entity: &Entity, name: &str) -> String {
    match entity.get(name) {
        Some(Value::String(value)) => value.clone(),
        _ => String::new(),
    }
}

/// Sample User entity for testing
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
}

impl User {
    pub fn new(username: String, email: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            username,
            email,
        }
    }

    pub fn key_for(id: Uuid) -> Key {
        Key::name("User", id.to_string(), None)
    }

    pub fn key(&self) -> Key {
        Self::key_for(self.id)
    }

    pub fn to_entity(&self) -> Entity {
        Entity::new()
            .with("username", self.username.as_str())
            .with("email", self.email.as_str())
    }

    pub fn from_entity(id: Uuid, entity: &Entity) -> Self {
        Self {
            id,
            username: string_property(entity, "username"),
            email: string_property(entity, "email"),
        }
    }
}

/// Sample Order entity for testing, stored in its user's entity group
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub product_name: String,
    pub amount: i64,
}

impl Order {
    pub fn new(user_id: Uuid, product_name: String, amount: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            product_name,
            amount,
        }
    }

    pub fn key_for(user_id: Uuid, id: Uuid) -> Key {
        Key::name("Order", id.to_string(), Some(User::key_for(user_id)))
    }

    pub fn key(&self) -> Key {
        Self::key_for(self.user_id, self.id)
    }

    pub fn to_entity(&self) -> Entity {
        Entity::new()
            .with("product_name", self.product_name.as_str())
            .with("amount", self.amount)
    }

    pub fn from_entity(user_id: Uuid, id: Uuid, entity: &Entity) -> Self {
        let amount = match entity.get("amount") {
            Some(Value::Integer(amount)) => *amount,
            _ => 0,
        };
        Self {
            id,
            user_id,
            product_name: string_property(entity, "product_name"),
            amount,
        }
    }
}
