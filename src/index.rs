//! Element access that is bounds-checked in debug builds and unchecked in
//! release builds. The rotation loops touch the same handful of entries many
//! times per sweep; every call site stays within the active range by
//! construction, which the debug check enforces under test.

use ndarray::{ArrayBase, Data, DataMut, Dimension, NdIndex};

pub(crate) trait GetUnchecked<I> {
    type Elem;
    unsafe fn at(&self, index: I) -> &Self::Elem;
}

pub(crate) trait GetUncheckedMut<I> {
    type Elem;
    unsafe fn at_mut(&mut self, index: I) -> &mut Self::Elem;
}

impl<A, S: Data<Elem = A>, D: Dimension, I: NdIndex<D>> GetUnchecked<I> for ArrayBase<S, D> {
    type Elem = A;

    unsafe fn at(&self, index: I) -> &Self::Elem {
        #[cfg(debug_assertions)]
        {
            self.get(index).unwrap()
        }
        #[cfg(not(debug_assertions))]
        self.uget(index)
    }
}

impl<A, S: DataMut<Elem = A>, D: Dimension, I: NdIndex<D>> GetUncheckedMut<I> for ArrayBase<S, D> {
    type Elem = A;

    unsafe fn at_mut(&mut self, index: I) -> &mut Self::Elem {
        #[cfg(debug_assertions)]
        {
            self.get_mut(index).unwrap()
        }
        #[cfg(not(debug_assertions))]
        self.uget_mut(index)
    }
}
