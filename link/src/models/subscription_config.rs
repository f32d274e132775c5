use serde_json::Value as JsonValue;

/// Configuration for a named subscription.
#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    /// Subscription identifier; generated when `None`
    pub id: Option<String>,
    /// Publication name sent in the `sub` message
    pub name: String,
    /// Ordered publication parameters
    pub params: Vec<JsonValue>,
    /// Collections whose data messages are routed to this subscription.
    /// Defaults to `[name]`.
    pub collections: Vec<String>,
}

impl SubscriptionConfig {
    /// Create a configuration for publication `name`.
    ///
    /// Data messages are routed by collection, which by default is the
    /// publication name itself.
    pub fn new(name: impl Into<String>, params: Vec<JsonValue>) -> Self {
        let name = name.into();
        Self {
            id: None,
            collections: vec![name.clone()],
            name,
            params,
        }
    }

    /// Use a caller-chosen subscription id instead of a generated one
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Also route data messages for `collection` to this subscription
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        let collection = collection.into();
        if !self.collections.contains(&collection) {
            self.collections.push(collection);
        }
        self
    }

    /// Replace the routed collection set
    pub fn with_collections<I, S>(mut self, collections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.collections = collections.into_iter().map(Into::into).collect();
        self
    }

    pub(crate) fn routes(&self, collection: &str) -> bool {
        self.collections.iter().any(|c| c == collection)
    }
}
