/// Optional backend features the harness branches on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Can remove every object of its namespace in one call.
    pub bulk_delete: bool,
}

impl Capabilities {
    pub const fn with_bulk_delete(mut self) -> Self {
        self.bulk_delete = true;
        self
    }
}
