pub mod product_usage;
