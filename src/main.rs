use std::process;

fn main() {
    process::exit(verdict::run());
}
