pub mod timeplus;
