pub fn use_color() -> bool {
    if std::env::var_os("NO_COLOR").is_some() {
        return false;
    }
    unsafe {
        libc::isatty(/* stdout */ 1) == 1
    }
}
