pub mod capture;
pub mod events;
pub mod output;

#[cfg(test)]
mod tests;
