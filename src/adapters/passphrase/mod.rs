pub mod strength_validator;
