pub mod history;
pub mod resolver;
pub mod stroke;
