#[derive(Debug, Clone, Default)]
pub struct Declare {
    pub exchange: String,
    pub typ: String,
    pub passive: bool,
    pub durable: bool,
    pub auto_delete: bool,
    pub internal: bool,
    pub no_wait: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DeclareOk;
