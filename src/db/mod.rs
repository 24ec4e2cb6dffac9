pub mod dbdiagram;
