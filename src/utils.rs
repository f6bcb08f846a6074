pub mod timer;

#[cfg(test)]
pub(crate) mod test_helpers;
