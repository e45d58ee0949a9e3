#[cfg(test)]
pub mod collecting;
pub mod worker;
