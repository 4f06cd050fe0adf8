pub mod topsort;
