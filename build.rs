use cfg_aliases::cfg_aliases;

fn main() {
    cfg_aliases! {
        // A PAC is selected, so the register-level modules can be built.
        fmc: { any(feature = "f4", feature = "h7") },
        // GPIO port clocks live on AHB4 on H7, AHB1 elsewhere.
        gpio_ahb4: { feature = "h7" },
    }
}
