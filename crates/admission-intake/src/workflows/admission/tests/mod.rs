mod common;
mod duplicates;
mod gate;
