pub mod norma;
