#[cfg(not(any(windows, target_arch = "wasm32")))]
use jemallocator::Jemalloc;

#[cfg(not(any(windows, target_arch = "wasm32")))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

fn main() {
    let exit_code = texmk::run::run();
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}
