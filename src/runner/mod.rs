pub mod ds;
pub mod vm;
