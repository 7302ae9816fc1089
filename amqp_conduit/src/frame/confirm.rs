#[derive(Debug, Clone, Default)]
pub struct Select {
    pub no_wait: bool,
}

impl Select {
    pub fn new(no_wait: bool) -> Self {
        Self { no_wait }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SelectOk;
