use crate::channel::ExchangeType;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Binding {
    pub queue: String,
    pub routing_key: String,
}

#[derive(Debug)]
pub(crate) struct Exchange {
    pub typ: ExchangeType,
    pub durable: bool,
    pub auto_delete: bool,
    pub internal: bool,
    pub bindings: Vec<Binding>,
}

impl Exchange {
    pub fn new(typ: ExchangeType, durable: bool) -> Self {
        Self {
            typ,
            durable,
            auto_delete: false,
            internal: false,
            bindings: Vec::new(),
        }
    }

    /// Add a binding, return `false` if it already exists.
    pub fn bind(&mut self, queue: &str, routing_key: &str) -> bool {
        let binding = Binding {
            queue: queue.to_owned(),
            routing_key: routing_key.to_owned(),
        };
        if self.bindings.contains(&binding) {
            return false;
        }
        self.bindings.push(binding);
        true
    }

    pub fn unbind(&mut self, queue: &str, routing_key: &str) {
        self.bindings
            .retain(|b| !(b.queue == queue && b.routing_key == routing_key));
    }

    /// Drop every binding of `queue`, return `true` if there was any.
    pub fn unbind_queue(&mut self, queue: &str) -> bool {
        let before = self.bindings.len();
        self.bindings.retain(|b| b.queue != queue);
        before != self.bindings.len()
    }

    /// Names of the bound queues matching `routing_key`, each at most once.
    pub fn route(&self, routing_key: &str) -> Vec<String> {
        let mut queues: Vec<String> = Vec::new();
        for binding in &self.bindings {
            let matched = match self.typ {
                ExchangeType::Direct => binding.routing_key == routing_key,
                ExchangeType::Fanout => true,
                ExchangeType::Topic => topic_matches(&binding.routing_key, routing_key),
            };
            if matched && !queues.contains(&binding.queue) {
                queues.push(binding.queue.clone());
            }
        }
        queues
    }
}

/// `*` matches exactly one word, `#` zero or more.
pub(crate) fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let words: Vec<&str> = routing_key.split('.').collect();
    matches_words(&pattern, &words)
}

fn matches_words(pattern: &[&str], words: &[&str]) -> bool {
    match pattern.split_first() {
        None => words.is_empty(),
        Some((&"#", rest)) => (0..=words.len()).any(|skip| matches_words(rest, &words[skip..])),
        Some((&"*", rest)) => !words.is_empty() && matches_words(rest, &words[1..]),
        Some((word, rest)) => words.first() == Some(word) && matches_words(rest, &words[1..]),
    }
}
