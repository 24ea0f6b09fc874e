/// CRUD operations for service, server and token rows
pub mod crud_tests;

/// Transaction handling: a rolled back pass leaves nothing behind
pub mod transaction_tests;
