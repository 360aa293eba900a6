use std::process;

fn main() {
    process::exit(tandem::app::run());
}
