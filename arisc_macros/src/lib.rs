//! Macros that generate the OpenRISC boot and exception boilerplate of the
//! ARISC firmware.
//!
//! The ARISC starts executing at `0x100` and takes exceptions at `0x200` to
//! `0xe00`, one vector every `0x100` bytes. Both the entrypoint and the
//! vectors are placed in dedicated sections, so the linker must be told where
//! they go.

use proc_macro::TokenStream;

use quote::{format_ident, quote};
use syn::{parse_macro_input, Ident, ItemFn};

/// First exception vector number (bus error, at `0x200`).
const FIRST_VECTOR: u32 = 0x2;

/// Last exception vector number (trap, at `0xe00`).
const LAST_VECTOR: u32 = 0xe;

/// Size of the frame where an exception saves the interrupted context.
const EXC_FRAME_SIZE: u32 = 128;

/// Generates the boilerplate required to call the provided function on boot.
///
/// The function must never return. The macro also generates a panic handler
/// that prints the panic location and message to the console.
///
/// Under the hood it specifies that the entrypoint must be placed into a
/// section called `.entry` and it sets the stack pointer to the address of
/// the `__stack_top` symbol.
///
/// The following example shows how to configure the linker using a Cargo
/// configuration file.
///
/// ```text
/// [target.or1k-none]
/// rustflags = [
///     "-Clink-arg=--section-start=.entry=0x100",
///     "-Clink-arg=--defsym=__stack_top=0x8000",
/// ]
/// ```
#[proc_macro_attribute]
pub fn entrypoint(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let item_fn = parse_macro_input!(item as ItemFn);

    let fname_rust = &item_fn.sig.ident;
    let fname_c = format_ident!("_arisc_c_{}", fname_rust);

    let start_code = format!(
        r#"
                l.movhi r0, 0

                // Set stack pointer.
                l.movhi r1, hi(__stack_top)
                l.ori r1, r1, lo(__stack_top)

                l.jal {fname_c}
                l.nop

            1:
                l.j 1b
                l.nop
        "#
    );

    let tokens = quote! {
        #[link_section = ".entry"]
        #[no_mangle]
        #[naked]
        unsafe extern "C" fn _start() -> ! {
            core::arch::asm!(#start_code, options(noreturn))
        }

        #[no_mangle]
        unsafe extern "C" fn #fname_c() -> ! {
            #fname_rust()
        }

        #[panic_handler]
        fn panic(info: &core::panic::PanicInfo) -> ! {
            arisc::print!("\n\n!!! PANIC !!!\n\n");

            if let Some(location) = info.location() {
                arisc::print!("{}:{}", location.file(), location.line());
            }

            arisc::println!(": {}", info.message());

            loop {}
        }

        #item_fn
    };

    tokens.into()
}

/// Generates the exception vector table.
///
/// It takes the exception handler as argument. The handler must have the
/// signature `fn(vector: u32, epcr: u32, sp: u32)`, where `vector` is the
/// vector number (vector address >> 8), `epcr` is the address of the
/// interrupted instruction and `sp` is the stack pointer at the time of the
/// exception. The caller-saved registers, EPCR and ESR are preserved around
/// the handler, so returning from it resumes the interrupted code.
///
/// Under the hood it creates a symbol called `_exception_vectors` and
/// specifies that it must be placed into a section called `.vectors`.
///
/// Given that vector tables are not referenced by other code, we need to
/// ensure that the linker does not optimize them away. This can be done with
/// the linker flag `--undefined`.
///
/// ```text
/// [target.or1k-none]
/// rustflags = [
///     "-Clink-arg=--undefined=_exception_vectors",
///     "-Clink-arg=--section-start=.vectors=0x200",
/// ]
/// ```
#[proc_macro]
pub fn exception_vectors(item: TokenStream) -> TokenStream {
    let handler = parse_macro_input!(item as Ident);
    let handler_c = format_ident!("_arisc_c_{}", handler);

    let vectors_code = (FIRST_VECTOR..=LAST_VECTOR)
        .map(|n| {
            format!(
                r#"
                    l.addi r1, r1, -{EXC_FRAME_SIZE}
                    l.sw 0(r1), r3
                    l.sw 4(r1), r9
                    l.ori r3, r0, {n:#x}
                    l.j _arisc_exception_common
                    l.nop
                    .balign 0x100
                "#
            )
        })
        .collect::<String>();

    let common_code = format!(
        r#"
            l.sw 8(r1), r4
            l.sw 12(r1), r5
            l.sw 16(r1), r6
            l.sw 20(r1), r7
            l.sw 24(r1), r8
            l.sw 28(r1), r11
            l.sw 32(r1), r12
            l.sw 36(r1), r13
            l.sw 40(r1), r15
            l.sw 44(r1), r17
            l.sw 48(r1), r19
            l.sw 52(r1), r21
            l.sw 56(r1), r23
            l.sw 60(r1), r25
            l.sw 64(r1), r27
            l.sw 68(r1), r29
            l.sw 72(r1), r31

            // Save EPCR0 and ESR0, a nested exception would clobber them.
            l.mfspr r4, r0, 0x20
            l.mfspr r5, r0, 0x40
            l.sw 76(r1), r4
            l.sw 80(r1), r5

            // handler(vector, epcr, sp)
            l.addi r5, r1, {EXC_FRAME_SIZE}
            l.jal {handler_c}
            l.nop

            l.lwz r4, 76(r1)
            l.mtspr r0, r4, 0x20
            l.lwz r5, 80(r1)
            l.mtspr r0, r5, 0x40

            l.lwz r31, 72(r1)
            l.lwz r29, 68(r1)
            l.lwz r27, 64(r1)
            l.lwz r25, 60(r1)
            l.lwz r23, 56(r1)
            l.lwz r21, 52(r1)
            l.lwz r19, 48(r1)
            l.lwz r17, 44(r1)
            l.lwz r15, 40(r1)
            l.lwz r13, 36(r1)
            l.lwz r12, 32(r1)
            l.lwz r11, 28(r1)
            l.lwz r8, 24(r1)
            l.lwz r7, 20(r1)
            l.lwz r6, 16(r1)
            l.lwz r5, 12(r1)
            l.lwz r4, 8(r1)
            l.lwz r9, 4(r1)
            l.lwz r3, 0(r1)
            l.addi r1, r1, {EXC_FRAME_SIZE}

            l.rfe
        "#
    );

    let tokens = quote! {
        #[link_section = ".vectors"]
        #[no_mangle]
        #[naked]
        unsafe extern "C" fn _exception_vectors() -> ! {
            core::arch::asm!(#vectors_code, options(noreturn))
        }

        #[no_mangle]
        #[naked]
        unsafe extern "C" fn _arisc_exception_common() -> ! {
            core::arch::asm!(#common_code, options(noreturn))
        }

        #[no_mangle]
        unsafe extern "C" fn #handler_c(vector: u32, epcr: u32, sp: u32) {
            #handler(vector, epcr, sp)
        }
    };

    tokens.into()
}
