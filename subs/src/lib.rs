pub mod services {
    pub mod pay;
    pub mod sub;
    pub mod usage;
}

pub mod dtos {
    pub mod sub;
    pub mod usage;
}

#[cfg(test)]
pub(crate) mod testing;
