pub mod pkcs8_generator;
