//! End-to-end janitor and update scenarios for depot.
